//! In-process syndication network: one hub and any number of sites.
//!
//! Every HTTP call (hub webhook deliveries and republish requests between
//! sites) goes through a [`WebhookRouter`], so a whole publish/subscribe
//! round trip runs synchronously inside one test.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use syndic_cdf::{ExportQueueItem, ImportQueueItem};
use syndic_engine::{
    drain, ClosureAssembler, DrainStats, EnqueueOperation, EnqueueOutcome, EntityEnqueuer,
    ExportWorker, HttpClient, HttpResponse, ImportWorker, IngestionEngine, InterestManager,
    LocalEntity, LoopbackClient, LoopbackServer, MemoryEntityHost, MemoryQueue,
    MemoryTrackingStore, PublisherTracker, QueuePoller, ReferenceCalculator, Republisher,
    RetryConfig, Serializer, StaticCapabilities, SubscriberTracker, SyncConfig, SyncResult, WebhookDispatcher,
    WorkQueue,
};
use syndic_hub::{ContentHub, DeliveryReport, HubClient, HubConfig, HubResult};
use uuid::Uuid;

/// Routes POSTs to the dispatcher registered for the URL.
#[derive(Clone, Default)]
pub struct WebhookRouter {
    routes: Arc<RwLock<HashMap<String, Arc<WebhookDispatcher>>>>,
}

impl WebhookRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dispatcher for a URL.
    pub fn route(&self, url: impl Into<String>, dispatcher: Arc<WebhookDispatcher>) {
        self.routes.write().insert(url.into(), dispatcher);
    }

    /// Removes a route, simulating an unreachable site.
    pub fn unroute(&self, url: &str) -> bool {
        self.routes.write().remove(url).is_some()
    }
}

impl LoopbackServer for WebhookRouter {
    fn handle_post(&self, url: &str, body: &[u8]) -> Result<HttpResponse, String> {
        let dispatcher = self.routes.read().get(url).cloned();
        match dispatcher {
            Some(dispatcher) => dispatcher.handle_post(url, body),
            None => Err(format!("no route to {}", url)),
        }
    }
}

impl std::fmt::Debug for WebhookRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookRouter")
            .field("routes", &self.routes.read().len())
            .finish()
    }
}

/// One fully wired repository.
pub struct TestSite {
    /// Engine configuration.
    pub config: SyncConfig,
    /// Local entity storage.
    pub host: Arc<MemoryEntityHost>,
    /// Publisher tracking table.
    pub publisher: PublisherTracker,
    /// Subscriber tracking table.
    pub subscriber: SubscriberTracker,
    /// Export work queue.
    pub export_queue: Arc<MemoryQueue<ExportQueueItem>>,
    /// Import work queue.
    pub import_queue: Arc<MemoryQueue<ImportQueueItem>>,
    /// Export enqueuer.
    pub enqueuer: Arc<EntityEnqueuer>,
    /// Export worker.
    pub export_worker: Arc<ExportWorker>,
    /// Import worker.
    pub import_worker: Arc<ImportWorker>,
    /// Webhook dispatcher.
    pub dispatcher: Arc<WebhookDispatcher>,
    /// Interest list manager.
    pub interests: InterestManager,
    /// Hub connection.
    pub client: HubClient,
}

impl TestSite {
    /// The site's client UUID.
    pub fn uuid(&self) -> Uuid {
        self.config.client_uuid
    }

    /// The site's webhook UUID.
    pub fn webhook_uuid(&self) -> Uuid {
        self.config.webhook_uuid.unwrap_or_default()
    }

    /// Stores a new entity and enqueues it for export.
    pub fn create(&self, entity: LocalEntity) -> SyncResult<EnqueueOutcome> {
        let entity = self.host.insert(entity);
        self.enqueuer.enqueue(&entity, EnqueueOperation::Insert)
    }

    /// Stores an edited entity and enqueues it for export.
    pub fn update(&self, entity: LocalEntity) -> SyncResult<EnqueueOutcome> {
        let entity = self.host.insert(entity);
        self.enqueuer.enqueue(&entity, EnqueueOperation::Update)
    }

    /// Queues an import of the given UUIDs.
    pub fn request_import(&self, uuids: &[Uuid]) -> SyncResult<String> {
        self.import_queue.push(ImportQueueItem::from_uuids(uuids))
    }

    /// Drains the export queue.
    pub fn run_exports(&self) -> SyncResult<DrainStats> {
        drain(
            self.export_queue.as_ref(),
            self.export_worker.as_ref(),
            &self.config.retry,
            usize::MAX,
        )
    }

    /// Drains the import queue.
    pub fn run_imports(&self) -> SyncResult<DrainStats> {
        drain(
            self.import_queue.as_ref(),
            self.import_worker.as_ref(),
            &self.config.retry,
            usize::MAX,
        )
    }

    /// A background poller for the export queue.
    pub fn export_poller(&self) -> QueuePoller<ExportQueueItem> {
        QueuePoller::from_config(
            self.export_queue.clone(),
            self.export_worker.clone(),
            &self.config,
        )
    }

    /// A background poller for the import queue.
    pub fn import_poller(&self) -> QueuePoller<ImportQueueItem> {
        QueuePoller::from_config(
            self.import_queue.clone(),
            self.import_worker.clone(),
            &self.config,
        )
    }
}

impl std::fmt::Debug for TestSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSite")
            .field("uuid", &self.config.client_uuid)
            .field("name", &self.config.client_name)
            .field("entities", &self.host.len())
            .finish()
    }
}

/// A hub, a router and the HTTP client connecting them.
pub struct TestNetwork {
    /// The hub.
    pub hub: Arc<ContentHub>,
    /// Webhook routes of every site.
    pub router: WebhookRouter,
    http: Arc<dyn HttpClient>,
}

impl TestNetwork {
    /// Creates a network around a fresh hub.
    pub fn new(config: HubConfig) -> Self {
        let hub = Arc::new(ContentHub::new(config));
        let router = WebhookRouter::new();
        let http: Arc<dyn HttpClient> = Arc::new(LoopbackClient::new(router.clone()));
        hub.set_transport(Arc::clone(&http));
        Self { hub, router, http }
    }

    /// Registers and wires a site. Retries are disabled so failures surface
    /// on the first drain.
    pub fn add_site(&self, name: &str, client_uuid: Uuid) -> HubResult<TestSite> {
        let webhook_uuid = Uuid::new_v4();
        let webhook_url = format!("memory://{}/webhook", name);
        let config = SyncConfig::new(client_uuid, name, "memory://hub")
            .with_webhook(webhook_uuid, webhook_url.clone())
            .with_retry(RetryConfig::no_retry());

        self.hub.register_client(client_uuid, name)?;
        self.hub
            .register_webhook(webhook_uuid, client_uuid, webhook_url.clone())?;

        let client = HubClient::new(Arc::clone(&self.hub), client_uuid);
        let remote = Arc::new(client.clone());
        let host = Arc::new(MemoryEntityHost::new());
        let publisher = PublisherTracker::new(Arc::new(MemoryTrackingStore::new()));
        let subscriber = SubscriberTracker::new(Arc::new(MemoryTrackingStore::new()));
        let export_queue: Arc<MemoryQueue<ExportQueueItem>> =
            Arc::new(MemoryQueue::from_config(&config));
        let import_queue: Arc<MemoryQueue<ImportQueueItem>> =
            Arc::new(MemoryQueue::from_config(&config));
        let interests =
            InterestManager::new(webhook_uuid, remote.clone(), config.interest_batch_size);

        let enqueuer = Arc::new(EntityEnqueuer::new(
            config.clone(),
            publisher.clone(),
            export_queue.clone(),
        ));
        let export_worker = Arc::new(
            ExportWorker::new(
                host.clone(),
                Arc::new(ReferenceCalculator::new(host.clone())),
                Serializer::new(client_uuid),
                publisher.clone(),
                remote.clone(),
            )
            .with_interest_manager(interests.clone()),
        );

        let assembler = ClosureAssembler::new(remote.clone())
            .with_batch_size(config.fetch_batch_size)
            .with_max_rounds(config.max_closure_rounds)
            .with_republisher(Republisher::new(
                client_uuid,
                remote.clone(),
                Arc::clone(&self.http),
            ));
        let engine = IngestionEngine::new(
            host.clone(),
            Arc::new(StaticCapabilities::new(Vec::<String>::new())),
        )
        .with_tracker(subscriber.clone())
        .with_max_iterations(config.max_ingest_iterations);
        let import_worker = Arc::new(
            ImportWorker::new(assembler, engine).with_interest_manager(interests.clone()),
        );

        let dispatcher = Arc::new(
            WebhookDispatcher::new(client_uuid, host.clone())
                .with_publisher(enqueuer.clone())
                .with_subscriber(subscriber.clone(), import_queue.clone()),
        );
        self.router.route(webhook_url, dispatcher.clone());

        Ok(TestSite {
            config,
            host,
            publisher,
            subscriber,
            export_queue,
            import_queue,
            enqueuer,
            export_worker,
            import_worker,
            dispatcher,
            interests,
            client,
        })
    }

    /// Delivers queued hub notifications.
    pub fn deliver(&self) -> DeliveryReport {
        self.hub.deliver_pending()
    }

    /// Runs exports, deliveries and imports on every site until idle.
    ///
    /// Returns the number of rounds that did any work.
    pub fn settle(&self, sites: &[&TestSite]) -> SyncResult<usize> {
        let mut rounds = 0;
        loop {
            let mut work = 0;
            for site in sites {
                work += site.run_exports()?.processed();
            }
            let delivered = self.deliver();
            work += delivered.delivered + delivered.failed;
            for site in sites {
                work += site.run_imports()?.processed();
            }
            if work == 0 || rounds >= 50 {
                return Ok(rounds);
            }
            rounds += 1;
        }
    }
}

impl std::fmt::Debug for TestNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestNetwork")
            .field("hub", &self.hub)
            .field("router", &self.router)
            .finish()
    }
}
