//! Headless session client.
//!
//! ```text
//! procura-session status
//! procura-session login <email> <password>
//! procura-session switch <tenant-id>
//! procura-session logout
//! ```

use std::sync::Arc;

use anyhow::{Context, bail};

use procura_auth::Credentials;
use procura_client::{
    ClientConfig, CrossTabListener, HttpAuthApi, SessionSynchronizer, TracingNavigator,
};
use procura_core::TenantId;
use procura_infra::SharedStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    procura_observability::init();

    let config = ClientConfig::from_env()?;
    tracing::info!(api_url = %config.api_url, "starting session client");

    let store = config
        .storage
        .open()
        .await
        .context("failed to open session store")?;
    let shared = SharedStorage::new(store);

    let synchronizer = Arc::new(SessionSynchronizer::new(
        shared.open_tab(),
        Arc::new(HttpAuthApi::new(config.api_url.clone())),
        Arc::new(TracingNavigator),
        config.sync.clone(),
    ));
    let listener = CrossTabListener::new(synchronizer.clone()).start();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let result = run(&synchronizer, &args).await;
    listener.stop().await;
    result
}

async fn run(synchronizer: &SessionSynchronizer, args: &[&str]) -> anyhow::Result<()> {
    match args {
        [] | ["status"] => {
            synchronizer.hydrate().await;
        }
        ["login", email, password] => {
            synchronizer.login(&Credentials::new(*email, *password)).await?;
        }
        ["switch", tenant] => {
            synchronizer.hydrate().await;
            synchronizer.change_tenant(&TenantId::parse(*tenant)?).await?;
        }
        ["logout"] => {
            synchronizer.hydrate().await;
            synchronizer.logout().await?;
        }
        other => bail!("unknown command: {}", other.join(" ")),
    }

    let view = synchronizer.view();
    match &view.session {
        Some(session) => println!(
            "{} ({}) tenant={} bu={}",
            session.user().name,
            session.user().email,
            session.tenant_id(),
            session.bu_code()
        ),
        None => println!("{}", view.phase),
    }
    Ok(())
}
