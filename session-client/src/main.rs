use std::env;

use anyhow::{anyhow, Context, Result};
use session_client::{load_client_config, Credentials, SessionContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: session-cli [status | login <username> | logout | whoami]";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_client_config()?;
    if config.store_path.is_none() {
        info!("SESSION_STORE_PATH not set; the session will not outlive this process");
    }
    let context = SessionContext::new(config)?;

    let mut args = env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "status".to_string());

    let status = context.start().await;
    info!(%status, base_url = context.pipeline.base_url(), "session started");

    match command.as_str() {
        "status" => {
            let session = context.session();
            let summary = serde_json::json!({
                "status": session.status(),
                "is_authenticated": session.is_authenticated(),
                "username": session.user().map(|user| user.username.clone()),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "login" => {
            let username = args.next().ok_or_else(|| anyhow!(USAGE))?;
            let password =
                env::var("SESSION_PASSWORD").context("SESSION_PASSWORD must be set to log in")?;
            let outcome = context
                .gateway
                .login(&Credentials::new(username, password))
                .await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                return Err(anyhow!(outcome
                    .error
                    .unwrap_or_else(|| "login failed".to_string())));
            }
        }
        "logout" => {
            context.gateway.logout();
            println!("signed out");
        }
        "whoami" => {
            let user = context.user().ok_or_else(|| anyhow!("not signed in"))?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        other => return Err(anyhow!("unknown command '{other}'\n{USAGE}")),
    }

    Ok(())
}
