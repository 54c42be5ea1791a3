use crate::setup;
use std::path::Path;

pub fn run(config_path: &Path, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = setup::load_valid_config(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    if config.security.api_keys.is_empty() {
        tracing::warn!("security.api_keys is empty; HTTP transport is unauthenticated");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let ctx = setup::build_context(config)?;
        tollgate_server::serve(ctx).await
    })
}
