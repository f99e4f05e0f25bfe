use anyhow::Context;
use mi_band_client::domain::models::{AppEvent, ConnectOutcome, ConnectionStatus};
use mi_band_client::domain::settings::{Settings, SettingsService};
use mi_band_client::infrastructure::bluetooth::transport::GattTransport;
use mi_band_client::infrastructure::logging::init_logger;
use mi_band_client::MiBand;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _logging = init_logger(&settings.log_settings)?;
    info!(
        "Starting Mi Band client (settings: {})",
        settings_service.path().display()
    );

    run_platform(&settings).await
}

#[cfg(windows)]
async fn run_platform(settings: &Settings) -> anyhow::Result<()> {
    use mi_band_client::infrastructure::bluetooth::winrt::WinRtTransport;

    let transport = WinRtTransport::new(Duration::from_millis(settings.scan_timeout_ms));
    run(transport, settings).await
}

#[cfg(not(windows))]
async fn run_platform(_settings: &Settings) -> anyhow::Result<()> {
    anyhow::bail!("no Bluetooth backend is available on this platform")
}

#[cfg_attr(not(windows), allow(dead_code))]
async fn run<T: GattTransport>(transport: T, settings: &Settings) -> anyhow::Result<()> {
    let (sender, mut events) = mpsc::unbounded_channel();
    let mut band = MiBand::new(transport, sender);

    match band.connect().await {
        ConnectOutcome::Connected => {}
        ConnectOutcome::Declined => {
            println!("No band selected");
            return Ok(());
        }
        ConnectOutcome::Failed(e) => return Err(e).context("connecting to band"),
    }

    println!(
        "Device name:        {}",
        band.device_name().as_deref().unwrap_or("(unknown)")
    );
    match band.get_device_info().await {
        Ok(info) => {
            println!("Firmware version:   {}", info.firmware_version);
            println!("Profile version:    {}", info.profile_version);
        }
        Err(e) => warn!("Device info unavailable: {}", e),
    }
    match band.get_bluetooth_connection_parameters().await {
        Ok(params) => {
            println!("Latency:            {}", params.latency);
            println!("Connection interval: {} ms", params.connection_interval_ms);
        }
        Err(e) => warn!("Connection parameters unavailable: {}", e),
    }
    match band.get_battery_info().await {
        Ok(battery) => {
            println!("Battery level:      {}%", battery.level);
            println!("Battery status:     {}", battery.status_text());
            println!("Charge cycles:      {}", battery.charge_cycles);
            println!("Last charge:        {}", battery.last_charge);
        }
        Err(e) => warn!("Battery info unavailable: {}", e),
    }
    match band.get_steps().await {
        Ok(steps) => println!("Steps:              {}", steps),
        Err(e) => warn!("Step count unavailable: {}", e),
    }

    band.scan_steps(|steps| println!("Steps:              {}", steps))
        .await
        .context("starting step stream")?;

    let deadline = async {
        if settings.stream_duration_secs == 0 {
            std::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_secs(settings.stream_duration_secs)).await
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(AppEvent::ConnectionStatus(ConnectionStatus::Disconnected)) | None => {
                    println!("Band disconnected");
                    break;
                }
                Some(AppEvent::LogMessage(message)) => {
                    info!("{:?}: {}", message.severity, message.message);
                }
                Some(AppEvent::ConnectionStatus(status)) => info!("Status: {:?}", status),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    band.disconnect().await;
    Ok(())
}
