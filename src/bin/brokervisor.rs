//! `brokervisor`: consumes a Kafka consumer group and holds an MQTT
//! connection until SIGINT/SIGTERM/SIGQUIT.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use brokervisor::adapters::{KafkaConnector, MqttConnector};
use brokervisor::{
    AppConfig, ConsumerSpec, FieldLogHandler, LogWriter, Message, PubSubSpec, Service,
    SubscriptionSet, logging,
};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "brokervisor", version, about = "Supervised Kafka and MQTT clients")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

fn subscriptions(cfg: &AppConfig) -> Result<SubscriptionSet, Box<dyn std::error::Error>> {
    let set = SubscriptionSet::new();
    let Some(mqtt) = &cfg.mqtt else {
        return Ok(set);
    };
    for sub in &mqtt.subscriptions {
        let callback = Arc::new(|msg: &Message| {
            info!(
                topic = %msg.topic,
                qos = %msg.qos,
                retain = msg.retain,
                bytes = msg.payload.len(),
                "message received"
            );
        });
        set.insert(&sub.filter, sub.qos, callback)?;
    }
    Ok(set)
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = AppConfig::load(&cli.config)?;
    logging::init(&cfg.log)?;
    info!(app = %cfg.app_name, config = %cli.config.display(), "starting");

    let service = Service::builder(cfg.service_config())
        .with_subscribers(vec![Arc::new(LogWriter::new())])
        .build();

    let options = cfg.consumer_options();
    let handler = Arc::new(FieldLogHandler::new(service.bus().clone(), cfg.fields.clone()));
    let consumer = ConsumerSpec::new(
        Arc::new(KafkaConnector::new(options.clone())),
        cfg.identity()?,
        cfg.endpoints()?,
        handler,
    )
    .with_options(options);

    let pubsub = match cfg.pubsub_options() {
        Some(opts) => Some(
            PubSubSpec::new(Arc::new(MqttConnector::new()), opts)
                .with_subscriptions(subscriptions(&cfg)?),
        ),
        None => None,
    };

    service.run(consumer, pubsub).await?;
    info!("stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "brokervisor failed");
            eprintln!("brokervisor: {e}");
            ExitCode::FAILURE
        }
    }
}
