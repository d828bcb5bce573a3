//! Daemon composition: wires every background task together and runs until
//! SIGINT/SIGTERM.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tramuntana_core::config::Config;
use tramuntana_core::flood::FloodControl;
use tramuntana_core::monitor_state::MonitorState;
use tramuntana_core::state::StateStore;

use crate::bot::{ApprovalNotifier, Bot, CrashNotifier, QueueBoard};
use crate::listener::EventListener;
use crate::minuano::MinuanoBridge;
use crate::monitor::{Monitor, TurnTimers, UiEvent};
use crate::queue::Queue;
use crate::router::EventRouter;
use crate::status::StatusPoller;
use crate::telegram::Telegram;
use crate::tmux;

/// Run the bridge until the process is told to stop.
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    tmux::ensure_session(&config.tmux_session_name)
        .with_context(|| format!("cannot ensure tmux session {}", config.tmux_session_name))?;

    let state = Arc::new(StateStore::load(&config.state_path()).context("loading state.json")?);
    let monitor_state = Arc::new(Mutex::new(
        MonitorState::load(&config.monitor_state_path()).context("loading monitor_state.json")?,
    ));

    let cancel = CancellationToken::new();
    wire_signals(cancel.clone());

    let telegram = Telegram::new(&config.telegram_bot_token);
    let flood = Arc::new(FloodControl::new());
    let queue = Queue::new(Arc::new(telegram.clone()), flood, cancel.clone());

    let minuano = config
        .minuano_enabled()
        .then(|| MinuanoBridge::new(&config.minuano_bin, &config.minuano_db));

    let bot = Arc::new(Bot::new(
        Arc::clone(&config),
        telegram,
        Arc::clone(&state),
        Arc::clone(&monitor_state),
        queue.clone(),
        minuano,
        cancel.clone(),
    ));

    // Reconcile persisted bindings against the live multiplexer before any
    // poller runs.
    bot.reconcile_state();

    let timers = Arc::new(TurnTimers::new());
    let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

    // Transcript monitor, with the interactive-prompt channel feeding the
    // dispatcher.
    let (ui_tx, mut ui_rx) = tokio::sync::mpsc::unbounded_channel::<UiEvent>();
    let mut monitor = Monitor::new(
        config.session_map_path(),
        config.monitor_state_path(),
        claude_projects_root()?,
        config.monitor_poll_interval,
        Arc::clone(&state),
        Arc::clone(&monitor_state),
        queue.clone(),
        Arc::clone(&timers),
    );
    monitor.set_ui_sender(ui_tx);
    tasks.push(("monitor", tokio::spawn(monitor.run(cancel.clone()))));

    let ui_bot = Arc::clone(&bot);
    let ui_cancel = cancel.clone();
    tasks.push((
        "interactive relay",
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = ui_cancel.cancelled() => break,
                    event = ui_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                relay_interactive(&ui_bot, event).await;
            }
        }),
    ));

    let poller = StatusPoller::new(Arc::clone(&bot), queue.clone(), Arc::clone(&timers));
    tasks.push(("status poller", tokio::spawn(poller.run(cancel.clone()))));

    // Task-tracker notifications, only with a database configured.
    if config.minuano_enabled() {
        let (driver, task_rx, planner_rx) = EventListener::new(&config.minuano_db).split();
        tasks.push(("listener", tokio::spawn(driver.run(cancel.clone()))));

        let router = EventRouter {
            approval: Some(Box::new(ApprovalNotifier::new(Arc::clone(&bot)))),
            board: Some(Box::new(QueueBoard::new(Arc::clone(&bot)))),
            crash: Some(Box::new(CrashNotifier::new(Arc::clone(&bot)))),
        };
        tasks.push((
            "router",
            tokio::spawn(router.run(task_rx, planner_rx, cancel.clone())),
        ));
    } else {
        info!("MINUANO_DB not set; task tracker integration disabled");
    }

    tasks.push((
        "ingress",
        tokio::spawn(Arc::clone(&bot).run_ingress(cancel.clone())),
    ));

    info!("tramuntana running; press Ctrl-C to stop");
    cancel.cancelled().await;
    info!("shutdown requested, draining tasks");

    for (name, task) in tasks {
        if let Err(err) =
            tokio::time::timeout(std::time::Duration::from_secs(5), task).await
        {
            error!("task {} did not stop in time: {}", name, err);
        }
    }

    if let Err(err) = state.save() {
        warn!("final state save failed: {}", err);
    }

    info!("shutdown complete");
    Ok(())
}

/// Mirror an interactive prompt to every user observing the window.
async fn relay_interactive(bot: &Arc<Bot>, event: UiEvent) {
    let targets: Vec<(i64, i64, i64)> = {
        let state = bot.state.lock();
        state
            .find_users_for_window(&event.window_id)
            .into_iter()
            .filter_map(|ut| {
                let chat_id = state.group_chat_id(&ut.user_id, &ut.thread_id)?;
                Some((ut.user_id.parse().ok()?, chat_id, ut.thread_id.parse().ok()?))
            })
            .collect()
    };

    for (user_id, chat_id, thread_id) in targets {
        bot.show_interactive_ui(user_id, chat_id, thread_id, &event.window_id, &event.ui_name)
            .await;
    }
}

fn claude_projects_root() -> Result<std::path::PathBuf> {
    Ok(tramuntana_core::home::home_dir()
        .context("resolving home directory")?
        .join(".claude")
        .join("projects"))
}

fn wire_signals(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl-C");
        }

        cancel.cancel();
    });
}
