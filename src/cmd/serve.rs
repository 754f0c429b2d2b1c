//! Long-running service command: `pipeline-factory serve`.

use anyhow::Result;
use pipeline_factory::config::FactoryConfig;

pub async fn cmd_serve(mut config: FactoryConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    pipeline_factory::factory::server::start_server(&config).await
}
