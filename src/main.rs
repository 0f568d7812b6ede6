//! Kelmah realtime - headless client for the real-time channel.
//!
//! Connects with credentials from the environment, keeps the stores in sync
//! and logs every notification until Ctrl-C.
//!
//! Environment variables (besides those read by `SyncConfig::from_env`):
//! - `KELMAH_USER_ID`, `KELMAH_USER_ROLE`, `KELMAH_TOKEN`: credentials (required)
//! - `KELMAH_WATCH_JOBS`: comma-separated job ids to subscribe to

use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use kelmah_client::logging::init_tracing;
use kelmah_client::{
    Clock, EventKind, SharedStores, SyncConfig, SyncEvent, SyncSession, SystemClock, WsTransport,
};
use kelmah_shared::{Credentials, UserRole};
use tokio::task::LocalSet;

/// Typing indicators older than this are swept.
const TYPING_TTL_SECS: i64 = 5;
/// Notifications older than this are pruned.
const NOTIFICATION_RETENTION_DAYS: i64 = 7;

fn credentials_from_env() -> anyhow::Result<Credentials> {
    let var = |name: &str| std::env::var(name).with_context(|| format!("{} is not set", name));
    let role: UserRole = var("KELMAH_USER_ROLE")?
        .parse()
        .context("KELMAH_USER_ROLE must be worker, hirer or admin")?;
    Ok(Credentials::new(var("KELMAH_USER_ID")?, role, var("KELMAH_TOKEN")?))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("kelmah_realtime=info,kelmah_client=debug");

    let config = SyncConfig::from_env().context("loading sync configuration")?;
    let credentials = credentials_from_env()?;
    let watch_jobs: Vec<String> = std::env::var("KELMAH_WATCH_JOBS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect();

    let clock: Rc<dyn Clock> = Rc::new(SystemClock);
    let (mut session, handle) = SyncSession::new(config, WsTransport::new(), clock.clone());

    let stores = SharedStores::new();
    stores.attach(session.manager_mut().dispatcher_mut(), clock.clone());

    let notifications = stores.notifications.clone();
    session.manager_mut().subscribe(EventKind::ConnectionChanged, move |event| {
        if let SyncEvent::ConnectionChanged(state) = event {
            tracing::info!(
                unread = notifications.borrow().unread_count(),
                "Connection {}",
                state
            );
        }
        Ok(())
    });
    session.manager_mut().subscribe(EventKind::Notification, |event| {
        if let SyncEvent::Notification(n) = event {
            tracing::info!(severity = ?n.severity, "{}: {}", n.title, n.message);
        }
        Ok(())
    });
    for kind in EventKind::NOTIFYING {
        let clock = clock.clone();
        session.manager_mut().subscribe(kind, move |event| {
            if let SyncEvent::Server(server) = event {
                if let Some(n) = kelmah_client::stores::notification_for(server, clock.now()) {
                    tracing::info!(kind = ?n.kind, severity = ?n.severity, "{}: {}", n.title, n.message);
                }
            }
            Ok(())
        });
    }

    LocalSet::new()
        .run_until(async move {
            let session_task = session.spawn_local();

            handle.connect(credentials)?;
            for job_id in watch_jobs {
                let outcome = handle.subscribe_job(job_id.as_str()).await?;
                tracing::info!(job_id = %job_id, ?outcome, "Watching job");
            }

            // Housekeeping the stores never do on their own.
            let sweep_stores = stores.clone();
            let sweep_clock = clock.clone();
            let sweeper = tokio::task::spawn_local(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    let now = sweep_clock.now();
                    sweep_stores
                        .conversations
                        .borrow_mut()
                        .expire_typing(now, chrono::Duration::seconds(TYPING_TTL_SECS));
                    sweep_stores
                        .notifications
                        .borrow_mut()
                        .prune_older_than(now - chrono::Duration::days(NOTIFICATION_RETENTION_DAYS));
                }
            });

            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            tracing::info!("Shutting down");

            sweeper.abort();
            handle.shutdown()?;
            session_task.await.context("sync session panicked")?;

            let notifications = stores.notifications.borrow();
            let conversations = stores.conversations.borrow();
            tracing::info!(
                notifications = notifications.len(),
                unread = notifications.unread_count(),
                conversations = conversations.len(),
                unread_messages = conversations.total_unread(),
                "Final store state"
            );
            Ok(())
        })
        .await
}
