// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Connection lifecycle shared by every engine handle
//!
//! `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`.
//! States are never skipped. Engines wrap their real connect/disconnect in
//! [`Lifecycle::connect_with`] / [`Lifecycle::disconnect_with`] so the rules are
//! enforced in one place.

use crate::error::EngineResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Handle connection state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Disconnected => "disconnected",
            EngineState::Connecting => "connecting",
            EngineState::Connected => "connected",
            EngineState::Disconnecting => "disconnecting",
        };
        write!(f, "{}", name)
    }
}

/// State tracker for one handle
#[derive(Debug)]
pub struct Lifecycle {
    name: String,
    state: Mutex<EngineState>,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(EngineState::Disconnected),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == EngineState::Connected
    }

    /// Run `attempt` as the connect step.
    ///
    /// Any state other than `Disconnected` makes this a logged no-op and `attempt`
    /// is never called. A failed attempt reverts to `Disconnected` and the error is
    /// returned.
    pub async fn connect_with<F, Fut>(&self, attempt: F) -> EngineResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<()>>,
    {
        {
            let mut state = self.state.lock();
            if *state != EngineState::Disconnected {
                log::warn!(
                    "connect() ignored for '{}': handle is already {}",
                    self.name,
                    *state
                );
                return Ok(());
            }
            *state = EngineState::Connecting;
        }
        log::debug!("'{}' connecting", self.name);

        match attempt().await {
            Ok(()) => {
                *self.state.lock() = EngineState::Connected;
                log::debug!("'{}' connected", self.name);
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = EngineState::Disconnected;
                log::warn!("'{}' failed to connect: {}", self.name, e);
                Err(e)
            }
        }
    }

    /// Run `attempt` as the disconnect step.
    ///
    /// Only a `Connected` handle disconnects; anything else is a no-op. A failed
    /// attempt leaves the handle `Connected`.
    pub async fn disconnect_with<F, Fut>(&self, attempt: F) -> EngineResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<()>>,
    {
        {
            let mut state = self.state.lock();
            if *state != EngineState::Connected {
                log::debug!(
                    "disconnect() ignored for '{}': handle is {}",
                    self.name,
                    *state
                );
                return Ok(());
            }
            *state = EngineState::Disconnecting;
        }

        match attempt().await {
            Ok(()) => {
                *self.state.lock() = EngineState::Disconnected;
                log::debug!("'{}' disconnected", self.name);
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = EngineState::Connected;
                log::warn!("'{}' failed to disconnect: {}", self.name, e);
                Err(e)
            }
        }
    }
}
