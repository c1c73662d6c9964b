use std::{future::Future, sync::Arc, time::Duration};

use futures_util::future::join_all;
use hermod_common::{
    Policy, PolicyConfig, Signal, UserDirectory, internal,
    listener::Listener,
    logging,
    users::{StaticUserDirectory, UsersConfig},
};
use hermod_delivery::DeliveryProcessor;
use hermod_smtp::{Smtp, SmtpConfig};
use hermod_spool::{BackingStore, SpoolConfig};
use hermod_tracing::traced;
use serde::Deserialize;
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};

const fn default_shutdown_timeout() -> u64 {
    60
}

const fn default_delivery_join_timeout() -> u64 {
    10
}

/// Shared by every session and the delivery engine.
#[derive(Debug, Clone)]
pub struct Context {
    pub policy: Arc<Policy>,
    pub users: Arc<dyn UserDirectory>,
    pub spool: Arc<dyn BackingStore>,
}

/// The whole server, as described by the configuration file.
///
/// ```ron
/// (
///     policy: (local_domains: ["local.test"]),
///     users: (mailbox_root: "/var/mail/hermod", accounts: [(address: "postmaster@local.test")]),
///     smtp: (listeners: [(socket: "[::]:25")]),
///     spool: File(path: "/var/spool/hermod"),
///     delivery: (scan_interval_secs: 60),
/// )
/// ```
#[derive(Debug, Deserialize)]
pub struct Hermod {
    policy: PolicyConfig,
    #[serde(default)]
    users: UsersConfig,
    #[serde(default)]
    smtp: SmtpConfig,
    #[serde(default)]
    spool: SpoolConfig,
    #[serde(default)]
    delivery: DeliveryProcessor,
    /// Upper bound on the whole shutdown sequence
    #[serde(default = "default_shutdown_timeout")]
    shutdown_timeout_secs: u64,
    /// How long to wait for the delivery processor to finish its pass
    #[serde(default = "default_delivery_join_timeout")]
    delivery_join_timeout_secs: u64,
}

/// Waits for SIGINT or SIGTERM.
#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown_requested() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

impl Hermod {
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[must_use]
    pub const fn delivery_join_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_join_timeout_secs)
    }

    /// Builds the policy, the user directory and the spool.
    ///
    /// An unresolvable default mailbox is reported but allowed: mail for unknown local users
    /// then bounces.
    ///
    /// # Errors
    /// If no local domain is configured, an account address is invalid, or the spool cannot
    /// be opened.
    pub fn context(&self) -> anyhow::Result<Context> {
        let policy = Arc::new(Policy::new(&self.policy)?);
        let users = Arc::new(StaticUserDirectory::new(&self.users)?);
        let spool = self.spool.build()?;

        internal!(
            level = INFO,
            "Serving {} local domains (primary {}), {} accounts",
            policy.local_domains().len(),
            policy.primary_domain(),
            users.len()
        );

        if let Some(default) = users.default_mailbox()
            && users.resolve(default).is_none()
        {
            internal!(
                level = WARN,
                "Default mailbox {default} is not a configured account; mail for unknown local users will bounce"
            );
        }

        Ok(Context {
            policy,
            users,
            spool,
        })
    }

    /// Run the server until SIGINT or SIGTERM.
    ///
    /// # Errors
    ///
    /// Startup failures: an invalid configuration, an unusable spool, or a socket that cannot
    /// be bound.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        self.run_until(shutdown_requested()).await
    }

    /// Run the server until `stop` completes, then shut down within the configured bounds.
    ///
    /// # Errors
    ///
    /// As for [`run`](Self::run), or whatever `stop` returns.
    pub async fn run_until(
        mut self,
        stop: impl Future<Output = anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let context = self.context()?;

        let mut bound = Vec::with_capacity(self.smtp.listeners.len());
        for config in &self.smtp.listeners {
            let smtp = Smtp::new(
                config,
                Arc::clone(&context.policy),
                Arc::clone(&context.users),
                Arc::clone(&context.spool),
            );
            let listener = Listener::new(smtp, &config.listener());
            listener.init()?;
            let socket = listener.bind().await?;
            bound.push((listener, socket));
        }

        self.delivery
            .init(context.spool, context.policy, context.users)?;

        internal!("Controller running");

        let (sender, _) = broadcast::channel(16);

        let delivery = std::mem::take(&mut self.delivery);
        let delivery = tokio::spawn({
            let signal = sender.subscribe();
            async move { delivery.serve(signal).await }
        });

        let listeners = bound
            .into_iter()
            .map(|(listener, socket)| (listener, socket, sender.subscribe()))
            .collect();
        let mut servers = tokio::spawn(serve_listeners(listeners));
        let mut servers_finished = false;

        let result = tokio::select! {
            result = stop => result,
            joined = &mut servers => {
                servers_finished = true;
                internal!(level = WARN, "All listeners stopped");
                joined.map_err(anyhow::Error::from).and_then(|result| result)
            }
        };

        self.shutdown(&sender, delivery, (!servers_finished).then_some(servers))
            .await;

        result
    }

    /// Broadcasts shutdown and waits, within the configured limits, for everything to stop.
    async fn shutdown(
        &self,
        sender: &broadcast::Sender<Signal>,
        delivery: JoinHandle<anyhow::Result<()>>,
        servers: Option<JoinHandle<anyhow::Result<()>>>,
    ) {
        internal!(level = INFO, "Shutting down...");

        if sender.send(Signal::Shutdown).is_err() {
            internal!("Nothing left running to shut down");
        }

        let delivery_join = self.delivery_join_timeout();
        let drained = tokio::time::timeout(self.shutdown_timeout(), async move {
            match tokio::time::timeout(delivery_join, delivery).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => {
                    internal!(level = ERROR, "Delivery processor failed: {err}");
                }
                Ok(Err(err)) => internal!(level = ERROR, "Delivery processor panicked: {err}"),
                Err(_) => internal!(
                    level = WARN,
                    "Delivery processor did not stop within {}s",
                    delivery_join.as_secs()
                ),
            }

            if let Some(servers) = servers {
                match servers.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => internal!(level = ERROR, "Listener failed: {err}"),
                    Err(err) => internal!(level = ERROR, "Listener panicked: {err}"),
                }
            }
        })
        .await;

        if drained.is_err() {
            internal!(
                level = WARN,
                "Shutdown did not complete within {}s, exiting anyway",
                self.shutdown_timeout_secs
            );
        }

        let _ = sender.send(Signal::Finalised);
        internal!(level = INFO, "Shutdown complete");
    }
}

async fn serve_listeners(
    listeners: Vec<(Listener<Smtp>, TcpListener, broadcast::Receiver<Signal>)>,
) -> anyhow::Result<()> {
    join_all(
        listeners
            .into_iter()
            .map(|(listener, socket, signal)| async move { listener.serve_on(socket, signal).await }),
    )
    .await
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config;

    #[test]
    fn defaults() {
        let hermod = config::parse(r#"(policy: (local_domains: ["local.test"]))"#)
            .expect("minimal config");

        assert_eq!(hermod.shutdown_timeout(), Duration::from_secs(60));
        assert_eq!(hermod.delivery_join_timeout(), Duration::from_secs(10));
        assert!(hermod.smtp.listeners.is_empty());
        assert_eq!(hermod.spool, SpoolConfig::default());
        assert_eq!(hermod.delivery.max_attempts, 10);
    }

    #[test]
    fn local_domains_are_required() {
        let hermod = config::parse("(policy: (local_domains: []), spool: Memory)")
            .expect("parses");

        let err = hermod.context().expect_err("no local domains");
        assert!(err.to_string().contains("domain"));
    }

    #[test]
    fn relative_spool_paths_abort_startup() {
        let hermod = config::parse(
            r#"(policy: (local_domains: ["local.test"]), spool: File(path: "spool"))"#,
        )
        .expect("parses");

        assert!(hermod.context().is_err());
    }

    #[test]
    fn invalid_accounts_abort_startup() {
        let hermod = config::parse(
            r#"(
                policy: (local_domains: ["local.test"]),
                users: (accounts: [(address: "not-an-address")]),
                spool: Memory,
            )"#,
        )
        .expect("parses");

        assert!(hermod.context().is_err());
    }

    #[test]
    fn unresolvable_default_mailbox_is_allowed() {
        let hermod = config::parse(
            r#"(
                policy: (local_domains: ["local.test"]),
                users: (default_mailbox: Some("nobody@local.test")),
                spool: Memory,
            )"#,
        )
        .expect("parses");

        let context = hermod.context().expect("starts");
        assert_eq!(context.policy.primary_domain(), "local.test");
        assert!(context.users.default_mailbox().is_some());
    }
}
