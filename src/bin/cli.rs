use anyhow::{anyhow, Context, Result};
use dulcescan::decode::DefaultEngineFactory;
use dulcescan::permissions::check_permission;
use dulcescan::platform::NokhwaBackend;
use dulcescan::session::default_feedback;
use dulcescan::types::ScanEvent;
use dulcescan::usb::{KeyInput, UsbListener};
use dulcescan::{DeviceSelector, ScannerConfig, ScannerSession};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

fn main() -> Result<()> {
    dulcescan::init_logging();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: dulcescan-cli <list-devices|check-permission|scan|usb-listen> [args]");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let command = &args[1];
    match command.as_str() {
        "list-devices" => runtime.block_on(cmd_list_devices(&args)),
        "check-permission" => runtime.block_on(cmd_check_permission()),
        "scan" => runtime.block_on(cmd_scan(&args)),
        "usb-listen" => runtime.block_on(cmd_usb_listen(&args)),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn load_config(args: &[String]) -> Result<ScannerConfig> {
    match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).ok_or_else(|| anyhow!("--config needs a path"))?;
            Ok(ScannerConfig::load_from_file(path)?)
        }
        None => Ok(ScannerConfig::load_or_default()),
    }
}

fn print_event(event: &ScanEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{:?} scan: {}", event.source, event.code);
    }
    Ok(())
}

async fn cmd_list_devices(args: &[String]) -> Result<()> {
    let mut selector = DeviceSelector::new(Arc::new(NokhwaBackend::new()));
    let devices = selector.list_video_inputs().await?;
    let default_id = selector.current().map(|d| d.id.clone());
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for (i, d) in devices.iter().enumerate() {
            let marker = if default_id.as_deref() == Some(d.id.as_str()) { "*" } else { " " };
            println!("{} {}: {}", marker, d.id, d.display_label(i));
        }
    }
    Ok(())
}

async fn cmd_check_permission() -> Result<()> {
    let info = check_permission(&NokhwaBackend::new()).await;
    println!("{}: {}", info.status, info.message);
    Ok(())
}

async fn cmd_scan(args: &[String]) -> Result<()> {
    // scan [device_id] [--continuous] [--timeout <ms>] [--json] [--config <path>]
    let mut device_id = None;
    let mut continuous = false;
    let mut timeout_ms: Option<u64> = None;
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--continuous" => continuous = true,
            "--json" => json = true,
            "--timeout" => {
                i += 1;
                let value = args.get(i).ok_or_else(|| anyhow!("--timeout needs a value"))?;
                timeout_ms = Some(value.parse()?);
            }
            "--config" => i += 1,
            other => {
                if device_id.is_none() {
                    device_id = Some(other.to_string());
                }
            }
        }
        i += 1;
    }

    let config = load_config(args)?;
    let backend = Arc::new(NokhwaBackend::new());
    let mut selector = DeviceSelector::new(backend.clone());
    selector.list_video_inputs().await?;
    if let Some(id) = &device_id {
        selector.select(id)?;
    }
    let device = selector
        .current()
        .map(|d| d.id.clone())
        .ok_or_else(|| anyhow!("no camera available"))?;

    let session = ScannerSession::with_feedback(
        backend,
        Arc::new(DefaultEngineFactory),
        config,
        default_feedback(),
    );
    session.set_continuous_mode(continuous);
    let mut events = session.subscribe_events();
    let mut status = session.subscribe_status();

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    session.start(&device, None).await?;
    let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms.unwrap_or(u64::MAX / 4)));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = &mut deadline => {
                eprintln!("Timed out");
                break;
            }
            update = status.recv() => match update {
                Ok(update) if !json => eprintln!("[{:?}] {}", update.severity, update.message),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, json)?;
                    if !continuous {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => log::warn!("{} scan events dropped", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop();
    Ok(())
}

async fn cmd_usb_listen(args: &[String]) -> Result<()> {
    use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
    use crossterm::terminal;

    let json = args.contains(&"--json".to_string());
    let config = load_config(args)?;
    let listener = Arc::new(UsbListener::new(config.usb, None));
    let mut events = listener.subscribe();
    listener.start_listening();
    eprintln!("Listening for USB scans, press Esc to quit");

    terminal::enable_raw_mode().context("failed to enable raw mode")?;
    let reader_listener = listener.clone();
    let reader = tokio::task::spawn_blocking(move || -> Result<()> {
        loop {
            if !event::poll(Duration::from_millis(100))? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let input = match key.code {
                KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(())
                }
                KeyCode::Char(c) => KeyInput::Char(c),
                KeyCode::Enter => KeyInput::Enter,
                _ => KeyInput::Other,
            };
            if let Err(e) = reader_listener.try_push_key(input) {
                log::debug!("{}", e);
            }
        }
    });
    tokio::pin!(reader);

    let outcome = loop {
        tokio::select! {
            done = &mut reader => break done.map_err(anyhow::Error::from).and_then(|r| r),
            event = events.recv() => match event {
                Ok(event) => {
                    // Raw mode: move to column 0 ourselves.
                    print!("\r");
                    if let Err(e) = print_event(&event, json) {
                        break Err(e);
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    terminal::disable_raw_mode().context("failed to restore terminal")?;
    listener.stop_listening();
    outcome
}
