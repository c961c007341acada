use crate::app::cmd::{Interpreter, InterpreterOptions};
use crate::app::render::Renderer;
use crate::app::reply::*;
use crate::hook::run::Runner;
use crate::state::model::UserSeed;
use crate::sync::controller::{SyncController, SyncReport};
use crate::sync::store::{DocumentChange, Store, Subscription};
use anyhow::{Context, Result};
use std::io::Write;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{self, Sleep};
use tracing::{debug, info};

/// Interval of the clock tick.
const TICK: Duration = Duration::from_secs(1);

/// A deferred action waiting for its delay to pass.
struct Pending {
    action: DeferredAction,
    timer: Pin<Box<Sleep>>,
}

/// The event loop around an [`Interpreter`].
///
/// One task multiplexes command lines, the one-second tick, pushed document
/// changes, persistence reports and at most one deferred action. Pushed
/// changes and reports are polled first. The next line is only read once the
/// previous command's persistence requests have settled and no deferred action
/// is pending.
pub struct Shell {
    interpreter: Interpreter,
    renderer: Renderer,
    subscription: Option<Subscription>,
    reports: mpsc::UnboundedReceiver<SyncReport>,
}

impl Shell {
    /// Sign in as `seed.profile.uid`: subscribe to the user's document and
    /// load it, creating it on first login.
    pub async fn start(
        store: Arc<dyn Store>,
        seed: UserSeed,
        runner: Option<Runner>,
        options: InterpreterOptions,
        renderer: Renderer,
    ) -> Result<Self> {
        let (sync, reports) = SyncController::new(store, seed.profile.uid.clone());
        let subscription = sync.subscribe();
        let document = sync
            .hydrate(&seed)
            .await
            .context("Failed to load user document")?;
        info!(uid = %document.uid, "signed in");

        let interpreter = Interpreter::new(sync, seed, runner, options)?;
        Ok(Self {
            interpreter,
            renderer,
            subscription: Some(subscription),
            reports,
        })
    }

    /// Run commands read from `input` until it ends or the user logs out.
    ///
    /// At end of input the loop keeps going until any pending deferred action
    /// has run and no persistence request is in flight.
    pub async fn run<R>(&mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;
        let mut pending: Option<Pending> = None;

        let mut ticker = time::interval(TICK);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            let settled = self.interpreter.sync().in_flight() == 0;
            if !input_open && pending.is_none() && settled {
                debug!("input drained");
                break;
            }

            // Queued pushes and reports drain before the next line is read.
            tokio::select! {
                biased;

                change = next_change(&mut self.subscription) => {
                    match change {
                        Some(change) => {
                            if let Some(reply) = self.interpreter.on_remote_change(&change) {
                                self.emit(&reply)?;
                            }
                        }
                        None => self.subscription = None,
                    }
                }
                Some(report) = self.reports.recv() => {
                    if let Some(reply) = self.interpreter.on_sync_report(&report) {
                        self.emit(&reply)?;
                    }
                }
                action = wait_pending(&mut pending) => {
                    pending = None;
                    let reply = self.interpreter.run_deferred(action).await;
                    self.emit(&reply)?;
                    if action == DeferredAction::Logout {
                        self.subscription = None;
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(reply) = self.interpreter.tick() {
                        self.emit(&reply)?;
                    }
                }
                line = lines.next_line(), if input_open && pending.is_none() && settled => {
                    match line.context("Failed to read command")? {
                        Some(line) => {
                            let reply = self.interpreter.execute(&line).await;
                            if let Some(deferred) = reply.deferred {
                                pending = Some(Pending {
                                    action: deferred.action,
                                    timer: Box::pin(time::sleep(deferred.delay)),
                                });
                            }
                            self.emit(&reply)?;
                        }
                        None => input_open = false,
                    }
                }
            }
        }
        Ok(())
    }

    fn emit(&self, reply: &Reply) -> Result<()> {
        let output = self.renderer.render(reply)?;
        if output.is_empty() {
            return Ok(());
        }
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{output}").context("Failed to write output")?;
        stdout.flush().context("Failed to flush output")
    }
}

/// The next pushed change, or never when unsubscribed.
async fn next_change(subscription: &mut Option<Subscription>) -> Option<DocumentChange> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// The pending action once its delay has passed, or never when there is none.
async fn wait_pending(pending: &mut Option<Pending>) -> DeferredAction {
    match pending {
        Some(pending) => {
            pending.timer.as_mut().await;
            pending.action
        }
        None => std::future::pending().await,
    }
}
