//! Execute one statement on a live interpreter session.
//!
//! Usage: `run_script [host] [code]`

use anyhow::Result;
use remote_interp_channel::{ChannelConfig, InterpreterSession, ScriptInterpreter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let code = args.next().unwrap_or_else(|| "print('hi')".to_string());

    let session = InterpreterSession::connect(ChannelConfig::new(host)).await?;
    let output = session.execute(&code).await?;
    print!("{output}");

    session.close().await;
    Ok(())
}
