//! Proxy runtime: all listener groups under one shutdown signal.
//!
//! # Responsibilities
//! - Bind one listener group per configured endpoint (any failure is fatal)
//! - Share one admission pool and one dispatcher across the groups
//! - Trigger shutdown on request and return once every group has drained

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::config::{Protocol, ProxyConfig};
use crate::http::RequestDispatcher;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::admission::AdmissionController;
use crate::net::listener::{ListenerError, ListenerGroup};
use crate::observability::{AccessRecorder, STARTUP_TARGET};

pub struct ProxyRuntime {
    groups: Vec<ListenerGroup>,
    dispatcher: Arc<RequestDispatcher>,
    admission: AdmissionController,
    shutdown: Shutdown,
}

impl ProxyRuntime {
    /// Bind every endpoint of `config`. Nothing is accepted until
    /// [`ProxyRuntime::run`] is called.
    pub async fn bind(config: &ProxyConfig, recorder: Arc<dyn AccessRecorder>) -> Result<Self, ListenerError> {
        let mut groups = Vec::with_capacity(config.endpoints.len());
        for endpoint in &config.endpoints {
            let group = ListenerGroup::bind(
                endpoint,
                &config.listener.bind_host,
                config.listener.queue_capacity,
            )
            .await?;
            groups.push(group);
        }

        Ok(Self {
            groups,
            dispatcher: Arc::new(RequestDispatcher::new(config, recorder)),
            admission: AdmissionController::new(
                config.admission.max_concurrent,
                config.admission.acquire_timeout(),
            ),
            shutdown: Shutdown::new(),
        })
    }

    /// Every bound address, with the protocol identity of its group.
    pub fn local_addrs(&self) -> Vec<(Protocol, SocketAddr)> {
        self.groups
            .iter()
            .flat_map(|g| g.local_addrs().into_iter().map(move |a| (g.protocol(), a)))
            .collect()
    }

    /// Handle that stops the runtime when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Serve until SIGINT/SIGTERM, then drain.
    pub async fn run(self) {
        self.run_until(signals::termination()).await;
    }

    /// Serve until `stop` resolves or the shutdown handle fires, then drain.
    pub async fn run_until<F>(self, stop: F)
    where
        F: Future<Output = ()>,
    {
        let signal = self.shutdown.subscribe();
        let mut running = JoinSet::new();
        for group in self.groups {
            running.spawn(group.run(
                Arc::clone(&self.dispatcher),
                self.admission.clone(),
                self.shutdown.subscribe(),
            ));
        }

        tokio::select! {
            () = stop => self.shutdown.trigger(),
            () = signal.recv() => {}
        }
        tracing::info!(target: STARTUP_TARGET, "Shutting down: no new connections, draining in-flight");

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Listener group task failed");
            }
        }
        tracing::info!(target: STARTUP_TARGET, "Shutdown complete");
    }
}
