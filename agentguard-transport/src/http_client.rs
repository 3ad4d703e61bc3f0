use std::sync::Arc;
use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use webpki_roots::TLS_SERVER_ROOTS;

/// Idle keep-alive connections to the proxy are dropped after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub(crate) type HyperClient = Client<HttpsConnector<HttpConnector>, Body>;

fn tls_config() -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Builds the pooled client shared by every request of one transport.
///
/// Plain `http://` stays allowed so a local proxy works without TLS.
pub(crate) fn build_https_client() -> HyperClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    let connector = HttpsConnector::from((http, Arc::new(tls_config())));

    Client::builder()
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .build::<_, Body>(connector)
}
