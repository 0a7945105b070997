//! Infrastructure wiring: stores, capability clients, handlers, processor.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use ventas_ai::{ChatCompletionsClient, ChatCompletionsConfig, LlmClient, StaticLlmClient};
use ventas_infra::AppConfig;
use ventas_infra::conversations::{
    ConversationService, ConversationStore, InMemoryConversationStore, PostgresConversationStore,
};
use ventas_infra::db;
use ventas_infra::external::{MessagingClient, MyAliceClient, RecordingMessagingClient};
use ventas_infra::queue::{
    AnalyzeSentimentHandler, InMemoryQueueStore, PostgresQueueStore, ProcessMessageHandler,
    QueueProcessor, QueueStore, QueueTrigger, SendFollowUpHandler,
};
use ventas_infra::webhook::WebhookIngestor;
use ventas_queue::QueueItemType;

/// Everything the HTTP handlers and the runner share.
pub struct AppServices {
    pub queue: Arc<dyn QueueStore>,
    pub processor: Arc<QueueProcessor>,
    pub conversations: ConversationService,
    pub ingestor: WebhookIngestor,
    pub trigger: QueueTrigger,
}

/// Capability clients; tests inject recording/static ones.
pub struct Clients {
    pub llm: Arc<dyn LlmClient>,
    pub messaging: Arc<dyn MessagingClient>,
}

/// Build services from configuration: Postgres when `DATABASE_URL` is set,
/// in-memory stores otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let (queue, conversations): (Arc<dyn QueueStore>, Arc<dyn ConversationStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = db::connect(url, config.database_max_connections)
                    .await
                    .context("failed to prepare database")?;
                info!("using postgres stores");
                let queue: Arc<dyn QueueStore> = Arc::new(PostgresQueueStore::new(pool.clone()));
                let conversations: Arc<dyn ConversationStore> =
                    Arc::new(PostgresConversationStore::new(pool));
                (queue, conversations)
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory stores");
                let queue: Arc<dyn QueueStore> = InMemoryQueueStore::arc();
                let conversations: Arc<dyn ConversationStore> = InMemoryConversationStore::arc();
                (queue, conversations)
            }
        };

    let clients = build_clients(config)?;
    Ok(assemble(config, queue, conversations, clients))
}

fn build_clients(config: &AppConfig) -> anyhow::Result<Clients> {
    let llm: Arc<dyn LlmClient> = match &config.llm {
        Some(settings) => {
            let client = ChatCompletionsClient::new(ChatCompletionsConfig::new(
                settings.base_url.clone(),
                settings.api_key.clone(),
                settings.model.clone(),
            ))
            .context("failed to build LLM client")?;
            info!(base_url = %settings.base_url, model = %settings.model, "LLM client configured");
            Arc::new(client)
        }
        None => {
            warn!("LLM_API_KEY not set; replies come from the static client");
            Arc::new(StaticLlmClient::default())
        }
    };

    let messaging: Arc<dyn MessagingClient> = match &config.messaging {
        Some(settings) => Arc::new(
            MyAliceClient::new(settings.base_url.clone(), settings.api_key.clone())
                .context("failed to build MyAlice client")?,
        ),
        None => {
            warn!("MYALICE_API_KEY not set; outbound messages are only recorded");
            Arc::new(RecordingMessagingClient::new())
        }
    };

    Ok(Clients { llm, messaging })
}

/// Wire handlers and the processor around already-built stores and clients.
pub fn assemble(
    config: &AppConfig,
    queue: Arc<dyn QueueStore>,
    conversations: Arc<dyn ConversationStore>,
    clients: Clients,
) -> AppServices {
    let service = ConversationService::new(
        conversations,
        clients.messaging,
        config.escalation.clone(),
    );

    let process_message = ProcessMessageHandler::new(service.clone(), clients.llm.clone(), queue.clone())
        .with_follow_up(config.follow_up.clone());
    let processor = QueueProcessor::new(queue.clone(), config.processor.clone())
        .with_handler(QueueItemType::ProcessMessage, Arc::new(process_message))
        .with_handler(
            QueueItemType::SendFollowUp,
            Arc::new(SendFollowUpHandler::new(service.clone())),
        )
        .with_handler(
            QueueItemType::AnalyzeSentiment,
            Arc::new(AnalyzeSentimentHandler::new(service.clone(), clients.llm)),
        );

    let trigger = QueueTrigger::new();
    let ingestor = WebhookIngestor::new(
        config.webhook_secret.clone(),
        queue.clone(),
        config.escalation.clone(),
    )
    .with_max_attempts(config.processor.retry.max_attempts)
    .with_trigger(trigger.clone());

    AppServices {
        queue,
        processor: Arc::new(processor),
        conversations: service,
        ingestor,
        trigger,
    }
}
