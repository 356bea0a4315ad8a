// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded pool of reusable browser sessions.
//!
//! The engine is launched lazily, once: concurrent first callers wait on a
//! `OnceCell` until the single initializer finishes. At most `max_sessions`
//! pooled sessions are checked out at a time. A checkout that waits longer
//! than `checkout_timeout` gets an ephemeral session instead, which is closed
//! rather than returned when released.

use super::{RenderContext, Renderer};
use anyhow::Result;
use futures::future::BoxFuture;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};

/// Launches the browser engine on first use.
pub type RendererLauncher =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Renderer>>> + Send + Sync>;

struct Idle {
    sessions: Mutex<Vec<Box<dyn RenderContext>>>,
}

impl Idle {
    fn pop(&self) -> Option<Box<dyn RenderContext>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    fn push(&self, session: Box<dyn RenderContext>) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session);
    }

    fn drain(&self) -> Vec<Box<dyn RenderContext>> {
        std::mem::take(&mut *self.sessions.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct SessionPool {
    launcher: RendererLauncher,
    engine: OnceCell<Arc<dyn Renderer>>,
    idle: Arc<Idle>,
    permits: Arc<Semaphore>,
    checkout_timeout: Duration,
}

impl SessionPool {
    pub fn new(launcher: RendererLauncher, max_sessions: usize, checkout_timeout: Duration) -> Self {
        Self {
            launcher,
            engine: OnceCell::new(),
            idle: Arc::new(Idle {
                sessions: Mutex::new(Vec::new()),
            }),
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
            checkout_timeout,
        }
    }

    /// Pool over an already running engine.
    pub fn with_renderer(
        renderer: Arc<dyn Renderer>,
        max_sessions: usize,
        checkout_timeout: Duration,
    ) -> Self {
        let launcher: RendererLauncher = Box::new(move || {
            let renderer = Arc::clone(&renderer);
            Box::pin(async move { Ok(renderer) })
        });
        Self::new(launcher, max_sessions, checkout_timeout)
    }

    /// The engine, launching it on first call. A failed launch is not cached,
    /// so the next caller tries again.
    pub async fn engine(&self) -> Result<Arc<dyn Renderer>> {
        self.engine
            .get_or_try_init(|| (self.launcher)())
            .await
            .map(Arc::clone)
    }

    pub fn is_started(&self) -> bool {
        self.engine.initialized()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Number of pooled sessions that could be checked out right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Check out a session. The returned guard releases it on every exit
    /// path, including early returns and panics.
    pub async fn checkout(&self) -> Result<PooledSession> {
        let engine = self.engine().await?;

        let permit = tokio::time::timeout(
            self.checkout_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await;

        match permit {
            Ok(Ok(permit)) => {
                let session = match self.idle.pop() {
                    Some(session) => session,
                    None => engine.new_context().await?,
                };
                Ok(PooledSession {
                    session: Some(session),
                    home: Some((Arc::clone(&self.idle), permit)),
                    discard: false,
                })
            }
            _ => {
                tracing::warn!(
                    "session pool exhausted after {}ms, using an ephemeral session",
                    self.checkout_timeout.as_millis()
                );
                Ok(PooledSession {
                    session: Some(engine.new_context().await?),
                    home: None,
                    discard: true,
                })
            }
        }
    }

    /// Close idle sessions and the engine, if it was ever started.
    pub async fn shutdown(&self) -> Result<()> {
        for session in self.idle.drain() {
            if let Err(e) = session.close().await {
                tracing::warn!("failed to close idle browser session: {e:#}");
            }
        }
        if let Some(engine) = self.engine.get() {
            engine.shutdown().await?;
        }
        Ok(())
    }
}

/// A checked-out session.
///
/// Dropping it returns a pooled session to the pool; ephemeral or discarded
/// sessions are closed instead.
pub struct PooledSession {
    session: Option<Box<dyn RenderContext>>,
    home: Option<(Arc<Idle>, OwnedSemaphorePermit)>,
    discard: bool,
}

impl PooledSession {
    pub fn is_ephemeral(&self) -> bool {
        self.home.is_none()
    }

    /// Close this session on release instead of reusing it.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl Deref for PooledSession {
    type Target = dyn RenderContext;

    fn deref(&self) -> &Self::Target {
        self.session
            .as_deref()
            .expect("session is present until the guard drops")
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("session is present until the guard drops")
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match self.home.take() {
            Some((idle, _permit)) if !self.discard => idle.push(session),
            _ => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(e) = session.close().await {
                            tracing::debug!("failed to close browser session: {e}");
                        }
                    });
                }
            }
        }
    }
}
