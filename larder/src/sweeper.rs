// Copyright 2025 larder Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{sync::Weak, time::Duration};

use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};

use crate::cache::{Cache, CacheInner};

/// Handle of a scheduled [`Sweeper`], used to cancel it.
pub(crate) struct SweeperHandle {
    stop: broadcast::Sender<()>,
    _handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub(crate) fn stop(&self) {
        let _ = self.stop.send(());
    }
}

/// The recurring background disposal task.
///
/// Every tick runs the expiration sweep, then the LFU sweep, then the orphan
/// purge — expiry first, so eviction never needlessly reclaims something
/// already expired. Holds only a weak reference to the cache: the task exits
/// on its own once the cache is dropped.
pub(crate) struct Sweeper {
    cache: Weak<CacheInner>,
    interval: Duration,
    stop_rx: broadcast::Receiver<()>,
}

impl Sweeper {
    /// Spawn the recurring disposal onto the current tokio runtime.
    pub(crate) fn schedule(cache: Weak<CacheInner>, interval: Duration) -> SweeperHandle {
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let sweeper = Sweeper {
            cache,
            interval,
            stop_rx,
        };
        let handle = tokio::spawn(sweeper.run());
        SweeperHandle {
            stop: stop_tx,
            _handle: handle,
        }
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval completes immediately
        tick.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = self.stop_rx.recv() => {
                    tracing::info!("[sweeper]: exit");
                    return;
                }
                _ = tick.tick() => {
                    let Some(inner) = self.cache.upgrade() else {
                        return;
                    };
                    Cache::from_inner(inner).dispose();
                }
            }
        }
    }
}
