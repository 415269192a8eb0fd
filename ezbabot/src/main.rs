mod classifier;
mod commands;
mod config;
mod export;
mod farmhand;
mod handlers;
mod intent;
mod model;
mod period;
mod reply;
mod storages;
mod webhook;

use std::sync::Arc;

use clap::Parser;
use classifier::{Classifier, openai::OpenAiModel};
use config::{Args, LedgerBackend};
use farmhand::Farmhand;
use handlers::{handle_callback_query, handle_text_message};
use storages::{LedgerStore, MemoryLedger, SheetsClient, SheetsLedger, YamlLedger};
use teloxide::prelude::*;

type StartupError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    pretty_env_logger::init();
    log::info!("Starting farm ledger bot...");

    if let Err(e) = run(args).await {
        log::error!("Bot stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let bot = Bot::new(args.bot_token()?);

    let store: Arc<dyn LedgerStore> = match args.ledger_backend()? {
        LedgerBackend::Sheets {
            key,
            spreadsheet_id,
            sheets,
        } => {
            log::info!(
                "Using spreadsheet {} as {} ({:?})",
                spreadsheet_id,
                key.client_email,
                sheets
            );
            let client = SheetsClient::new(key, spreadsheet_id, args.request_timeout())?;
            Arc::new(SheetsLedger::new(Arc::new(client), sheets))
        }
        LedgerBackend::Yaml(path) => {
            log::info!("Using YAML ledger file: {:?}", path);
            Arc::new(YamlLedger::new(path))
        }
        LedgerBackend::Memory => {
            log::warn!("No spreadsheet or ledger file configured, records are kept in memory only");
            Arc::new(MemoryLedger::new())
        }
    };

    let model = OpenAiModel::new(args.openai_config()?)?;
    let classifier = Classifier::new(Arc::new(model));

    let allow_list = args.allow_list()?;
    if allow_list.is_empty() {
        log::warn!("Allow-list is empty, every message will be rejected");
    } else {
        log::info!("{} users allowed", allow_list.len());
    }

    let bot_name = bot.get_me().await?.username().to_string();
    let farmhand = Arc::new(Farmhand::new(
        store,
        classifier,
        allow_list,
        args.farm_settings()?,
        bot_name,
    ));

    if let Some(addr) = args.listen_addr {
        webhook::serve(addr, args.webhook_secret.clone(), bot, farmhand).await?;
        return Ok(());
    }

    log::info!("No listen address, using long polling");
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                // Every text message, commands included, goes to the farmhand
                .branch(
                    dptree::filter(|msg: Message| msg.text().is_some())
                        .endpoint(handle_text_message),
                ),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback_query));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![farmhand])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}
