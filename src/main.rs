use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use sn_telemetry::config::Config;
use sn_telemetry::loopback::LoopbackGateway;
use sn_telemetry::sensor::SimulatedThermometer;
use sn_telemetry::{logger, SessionController};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::new() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logger::init(&config.logger) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("MQTT-SN telemetry client starting");

    let gateway = Arc::new(
        LoopbackGateway::new().with_loss_probability(config.simulation.loss_probability),
    );
    let sensor = SimulatedThermometer::new(
        "sim-temperature",
        config.simulation.base_temperature_centi,
        config.simulation.jitter_centi,
    );

    let mut controller = match SessionController::new(gateway.clone(), sensor, &config) {
        Ok(controller) => controller,
        Err(e) => {
            error!(error = %e, "invalid session configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = controller.start().await {
        error!(error = %e, state = %controller.state(), "startup failed");
        return ExitCode::FAILURE;
    }

    if config.simulation.command_interval_ms > 0 {
        spawn_remote_commands(
            gateway,
            config.session.command_topic.clone(),
            Duration::from_millis(config.simulation.command_interval_ms),
        );
    }

    tokio::select! {
        result = controller.run() => {
            if let Err(e) = result {
                error!(error = %e, "control loop stopped");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(stats = ?controller.stats(), "interrupted, shutting down");
        }
    }

    ExitCode::SUCCESS
}

/// Stand-in for a remote peer publishing on the command topic
fn spawn_remote_commands(gateway: Arc<LoopbackGateway>, topic: String, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = gateway.inject(&topic, b"ping") {
                warn!(error = %e, "simulated command dropped");
            }
        }
    });
}
