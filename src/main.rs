use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use homenest::backend::{BackendApi, HttpBackend, MemoryBackend};
use homenest::cli::{print_usage, PromptFederatedFlow, ProviderMode, Repl};
use homenest::identity::{IdentityProvider, LocalIdentityProvider, RestIdentityProvider, SessionAuthority};
use homenest::{Config, Navigator};

fn main() -> Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid log filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut args: Vec<String> = env::args().collect();
    let program = if args.is_empty() { "homenest".to_string() } else { args.remove(0) };

    let mut config = Config::from_env();
    let rest = config.apply_args(&args);
    if rest.iter().any(|a| a == "-h" || a == "--help") {
        print_usage(&program);
        return Ok(());
    }
    if let Some(unknown) = rest.first() {
        eprintln!("unrecognized argument: {}", unknown);
        print_usage(&program);
        std::process::exit(2);
    }

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "HomeNest session starting: RUST_LOG='{}', backend={}, identity={}, recheck={:?}",
        rust_log,
        config.backend_url,
        if config.identity_api_key.is_some() { config.identity_endpoint.as_str() } else { "local" },
        config.role_recheck
    );

    // Worker tasks must progress while the shell blocks on input.
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    let (provider, backend, mode): (Arc<dyn IdentityProvider>, Arc<dyn BackendApi>, ProviderMode) =
        match config.rest_provider() {
            Some(rest_config) => {
                let provider = RestIdentityProvider::new(rest_config, Arc::new(PromptFederatedFlow))
                    .context("failed to build identity client")?;
                let backend = HttpBackend::new(&config.backend_url, config.request_timeout)
                    .context("failed to build backend client")?;
                let provider: Arc<dyn IdentityProvider> = Arc::new(provider);
                let backend: Arc<dyn BackendApi> = Arc::new(backend);
                (provider, backend, ProviderMode::Remote)
            }
            None => {
                warn!(target: "startup", "HOMENEST_IDENTITY_API_KEY not set; using in-memory accounts and backend");
                let provider = Arc::new(LocalIdentityProvider::new());
                let backend = MemoryBackend::for_local(provider.clone());
                if let Ok(admins) = env::var("HOMENEST_LOCAL_ADMINS") {
                    for email in admins.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                        backend.grant_admin(email);
                    }
                }
                let shared: Arc<dyn IdentityProvider> = provider.clone();
                let backend: Arc<dyn BackendApi> = Arc::new(backend);
                (shared, backend, ProviderMode::Local(provider))
            }
        };

    let authority = Arc::new(SessionAuthority::new(provider, backend, config.session_options()));
    let _observer = {
        let _guard = rt.enter();
        authority.observe_identity().context("failed to observe identity provider")?
    };
    let navigator = Navigator::new(authority).with_paths(&config.login_path, &config.landing_path);

    Repl::new(&rt, navigator, mode).run()
}
