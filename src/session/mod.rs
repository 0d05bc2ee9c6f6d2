//! Session persistence layer
//!
//! A session owns the conversation history and the per-session tool cache
//! (market data and chart artifacts). Sessions live in memory; the store
//! trait keeps the door open for a durable backend.

use crate::memory::ConversationHistory;
use crate::tools::{ChartArtifact, PriceSeries};
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Cache carried across turns of one session
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub market_data: BTreeMap<String, PriceSeries>,
    pub charts: Vec<ChartArtifact>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_ticker(&self, ticker: &str) -> bool {
        self.market_data.contains_key(ticker)
    }

    pub fn insert_series(&mut self, series: PriceSeries) {
        self.market_data.insert(series.ticker.clone(), series);
    }

    pub fn tickers(&self) -> Vec<String> {
        self.market_data.keys().cloned().collect()
    }

    /// Replace any chart with the same key, keeping insertion order otherwise
    pub fn add_chart(&mut self, chart: ChartArtifact) {
        self.charts.retain(|c| c.key != chart.key);
        self.charts.push(chart);
    }

    pub fn is_empty(&self) -> bool {
        self.market_data.is_empty() && self.charts.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub history: ConversationHistory,
    pub context: SessionContext,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            history: ConversationHistory::new(),
            context: SessionContext::new(),
        }
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, creating it on first use
    async fn open(&self, id: Uuid) -> Result<SessionHandle>;
    async fn get(&self, id: Uuid) -> Result<Option<SessionHandle>>;
    async fn remove(&self, id: Uuid) -> Result<bool>;
    async fn list(&self) -> Result<Vec<Uuid>>;
}

/// In-memory session store
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn open(&self, id: Uuid) -> Result<SessionHandle> {
        if let Some(handle) = self.sessions.read().await.get(&id) {
            return Ok(handle.clone());
        }

        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(id))));
        Ok(handle.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SessionHandle>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        Ok(self.sessions.write().await.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        Ok(self.sessions.read().await.keys().copied().collect())
    }
}
