//! Registry of named bots with lazily built clients.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use tgb_core::{
    admission::{AdmissionControl, Scope, DEFAULT_WINDOW},
    config::Config,
    errors::Error,
    store::CounterStore,
    Result,
};

use crate::client::{BotClient, ClientConfig, HttpSender, ReqwestSender};

pub struct BotManager {
    bots: BTreeMap<String, String>,
    default_bot: String,
    client_cfg: ClientConfig,
    http: Arc<dyn HttpSender>,
    bot_admission: Option<Arc<AdmissionControl>>,
    clients: Mutex<HashMap<String, Arc<BotClient>>>,
}

impl std::fmt::Debug for BotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotManager")
            .field("bots", &self.bot_names())
            .field("default_bot", &self.default_bot)
            .finish_non_exhaustive()
    }
}

impl BotManager {
    /// Manager over a shared `reqwest` pool.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::with_sender(cfg, Arc::new(ReqwestSender::new()?)))
    }

    pub fn with_sender(cfg: &Config, http: Arc<dyn HttpSender>) -> Self {
        Self {
            bots: cfg.bots.clone(),
            default_bot: cfg.default_bot.clone(),
            client_cfg: ClientConfig::from_config(cfg),
            http,
            bot_admission: None,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Gate every bot's `sendMessage` through the configured per-bot limit.
    pub fn with_bot_admission(mut self, cfg: &Config, store: Arc<dyn CounterStore>) -> Self {
        self.bot_admission = Some(Arc::new(AdmissionControl::new(
            Scope::Bot,
            cfg.bot_rate_limit,
            DEFAULT_WINDOW,
            cfg.rate_limit_policy,
            Some(store),
        )));
        self
    }

    pub fn bot_names(&self) -> Vec<String> {
        self.bots.keys().cloned().collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.bots.contains_key(name)
    }

    /// Client for `name` (the default bot when `None`). Built on first use;
    /// later calls return the same instance.
    pub fn get(&self, name: Option<&str>) -> Result<Arc<BotClient>> {
        let name = name.unwrap_or(&self.default_bot);

        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(name) {
            return Ok(client.clone());
        }

        let Some(token) = self.bots.get(name) else {
            return Err(Error::Config(format!(
                "bot `{name}` is not configured (available: {})",
                self.bot_names().join(", ")
            )));
        };
        if token.trim().is_empty() {
            return Err(Error::Config(format!("bot `{name}` has an empty token")));
        }

        let mut client = BotClient::with_sender(token.clone(), self.client_cfg.clone(), self.http.clone());
        if let Some(admission) = &self.bot_admission {
            client = client.with_bot_admission(admission.clone());
        }
        let client = Arc::new(client);
        clients.insert(name.to_string(), client.clone());
        tracing::debug!(bot = name, "bot client created");
        Ok(client)
    }
}
