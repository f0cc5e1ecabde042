//! Per-observation-domain template store.
//!
//! Templates announced by an exporter are required to interpret its data
//! sets. The store keys them by `(observation domain id, template id)` and,
//! for UDP sources, bounds their lifetime: UDP exporters re-announce
//! templates periodically, and an entry that outlives its announcement
//! interval may silently mis-parse a reused template id after an exporter
//! restart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ipfix_wire::InformationElement;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct TemplateEntry {
    elements: Vec<InformationElement>,
    /// None for entries that never expire (TCP, or TTL disabled)
    expires_at: Option<Instant>,
}

impl TemplateEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Readers-writer protected template cache.
///
/// Reads (data-record decoding) run concurrently across sessions; writes
/// (template add, withdrawal, expiry) are exclusive.
#[derive(Debug)]
pub struct TemplateStore {
    ttl: Duration,
    templates: RwLock<HashMap<u32, HashMap<u16, TemplateEntry>>>,
}

impl TemplateStore {
    /// Create a store. A zero `ttl` disables expiry entirely.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Install or replace a template.
    ///
    /// `expire` is set for templates learned over UDP; combined with a
    /// non-zero TTL it stamps the entry with `now + ttl`.
    pub async fn add(
        &self,
        obs_domain_id: u32,
        template_id: u16,
        elements: Vec<InformationElement>,
        expire: bool,
        now: Instant,
    ) {
        let expires_at = (expire && !self.ttl.is_zero()).then(|| now + self.ttl);
        let mut templates = self.templates.write().await;
        templates.entry(obs_domain_id).or_default().insert(
            template_id,
            TemplateEntry {
                elements,
                expires_at,
            },
        );
    }

    /// Fetch a template's elements, removing the entry if it has expired.
    pub async fn get(
        &self,
        obs_domain_id: u32,
        template_id: u16,
        now: Instant,
    ) -> Option<Vec<InformationElement>> {
        {
            let templates = self.templates.read().await;
            match templates.get(&obs_domain_id).and_then(|d| d.get(&template_id)) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.elements.clone()),
                Some(_) => {}
            }
        }

        // Expired: delete under the write lock, rechecking in case the
        // exporter re-announced between the two locks.
        let mut templates = self.templates.write().await;
        if let Some(domain) = templates.get_mut(&obs_domain_id) {
            if domain.get(&template_id).is_some_and(|e| e.is_expired(now)) {
                domain.remove(&template_id);
                if domain.is_empty() {
                    templates.remove(&obs_domain_id);
                }
            }
        }
        None
    }

    /// Delete a template (withdrawal). Returns whether an entry existed.
    pub async fn remove(&self, obs_domain_id: u32, template_id: u16) -> bool {
        let mut templates = self.templates.write().await;
        let Some(domain) = templates.get_mut(&obs_domain_id) else {
            return false;
        };
        let removed = domain.remove(&template_id).is_some();
        if domain.is_empty() {
            templates.remove(&obs_domain_id);
        }
        removed
    }

    /// Drop every expired entry. Idempotent.
    pub async fn sweep(&self, now: Instant) {
        let mut templates = self.templates.write().await;
        for domain in templates.values_mut() {
            domain.retain(|_, entry| !entry.is_expired(now));
        }
        templates.retain(|_, domain| !domain.is_empty());
    }

    /// Drop every entry across all observation domains, expired or not.
    pub async fn clear(&self) {
        self.templates.write().await.clear();
    }

    /// Total number of stored templates across all observation domains
    pub async fn len(&self) -> usize {
        self.templates.read().await.values().map(HashMap::len).sum()
    }

    /// Whether the store holds no templates
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
