use crate::types::HttpSettings;
use reqwest::Client;
use reqwest::redirect::Policy;
use std::time::Duration;

/// One client per run. VUs share its connection pool, nothing else.
pub fn create_client(settings: &HttpSettings, max_vus: u32) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.timeout)
        .tcp_nodelay(true)
        .gzip(true)
        .brotli(true)
        .user_agent(format!(
            "loadstage/{} (load-testing-tool)",
            env!("CARGO_PKG_VERSION")
        ))
        .danger_accept_invalid_certs(settings.insecure);

    if settings.disable_keepalive {
        builder = builder
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Duration::ZERO);
    } else {
        builder = builder
            .pool_max_idle_per_host(max_vus.max(1) as usize)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60));
    }

    if settings.http2 {
        builder = builder.http2_prior_knowledge();
    }

    if !settings.follow_redirects {
        builder = builder.redirect(Policy::none());
    }

    builder.build()
}
