//! Event Bus (§4.10): subscription matching, one-shot consumption, TTL
//! expiry, and template rendering over `AgentEvent`s.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use ai_session::SessionCommandHelper;

use crate::model::{AgentEvent, EventType};

/// Request to create a subscription. `one_shot` and `ttl_minutes` default
/// to `true`/`30` via [`SubscriptionRequest::new`].
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub subscriber_session: String,
    pub event_types: Vec<EventType>,
    pub session_name_filter: Option<String>,
    pub member_id_filter: Option<String>,
    pub team_id_filter: Option<String>,
    pub message_template: String,
    pub one_shot: bool,
    pub ttl_minutes: i64,
}

impl SubscriptionRequest {
    pub fn new(
        subscriber_session: impl Into<String>,
        event_types: Vec<EventType>,
        message_template: impl Into<String>,
    ) -> Self {
        Self {
            subscriber_session: subscriber_session.into(),
            event_types,
            session_name_filter: None,
            member_id_filter: None,
            team_id_filter: None,
            message_template: message_template.into(),
            one_shot: true,
            ttl_minutes: 30,
        }
    }
}

struct Subscription {
    id: String,
    request: SubscriptionRequest,
    created_at: DateTime<Utc>,
}

impl Subscription {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > ChronoDuration::minutes(self.request.ttl_minutes)
    }

    fn matches(&self, event: &AgentEvent) -> bool {
        if !self.request.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(filter) = &self.request.session_name_filter {
            if filter != &event.session_name {
                return false;
            }
        }
        if let Some(filter) = &self.request.member_id_filter {
            if Some(filter) != event.member_id.as_ref() {
                return false;
            }
        }
        if let Some(filter) = &self.request.team_id_filter {
            if Some(filter) != event.team_id.as_ref() {
                return false;
            }
        }
        true
    }
}

/// Renders `message_template` by substituting
/// `{memberName, sessionName, previousValue, newValue, changedField, eventType, timestamp}`.
fn render_template(template: &str, event: &AgentEvent) -> String {
    template
        .replace("{memberName}", event.member_id.as_deref().unwrap_or(""))
        .replace("{sessionName}", &event.session_name)
        .replace("{previousValue}", &event.previous_value)
        .replace("{newValue}", &event.new_value)
        .replace("{changedField}", &format!("{:?}", event.changed_field))
        .replace("{eventType}", &format!("{:?}", event.event_type))
        .replace("{timestamp}", &event.timestamp.to_rfc3339())
}

/// The bus: a subscription table plus the command helper used to deliver
/// rendered messages back into subscriber sessions.
pub struct EventBus {
    subscriptions: DashMap<String, Subscription>,
    helper: Arc<SessionCommandHelper>,
}

impl EventBus {
    pub fn new(helper: Arc<SessionCommandHelper>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            helper,
        }
    }

    /// Rejects an empty template or an empty event-type list.
    pub fn create_subscription(&self, request: SubscriptionRequest) -> Result<String, String> {
        if request.message_template.trim().is_empty() {
            return Err("messageTemplate must not be empty".to_string());
        }
        if request.event_types.is_empty() {
            return Err("eventTypes must not be empty".to_string());
        }

        let id = Uuid::new_v4().to_string();
        self.subscriptions.insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                request,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    pub fn cancel_subscription(&self, id: &str) {
        self.subscriptions.remove(id);
    }

    /// Prunes expired entries, matches `event` against the rest, renders
    /// and enqueues a delivery per match, and deletes one-shot
    /// subscriptions after a successful enqueue.
    ///
    /// One-shot subscriptions are claimed by removal *before* sending
    /// (P5): under two concurrent `publish` calls matching the same
    /// subscription, `DashMap::remove` hands the entry to exactly one
    /// caller, so at most one of them ever calls `sendMessage`. A failed
    /// send re-inserts the claimed subscription so it isn't silently lost.
    pub async fn publish(&self, event: AgentEvent) {
        let now = Utc::now();
        self.subscriptions.retain(|_, sub| !sub.is_expired(now));

        let matches: Vec<(String, SubscriptionRequest)> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().matches(&event))
            .map(|entry| (entry.value().id.clone(), entry.value().request.clone()))
            .collect();

        for (id, request) in matches {
            if request.one_shot {
                let Some((_, claimed)) = self.subscriptions.remove(&id) else {
                    continue;
                };
                let message = render_template(&request.message_template, &event);
                match self
                    .helper
                    .send_message(&request.subscriber_session, &message)
                    .await
                {
                    Ok(()) => debug!(subscriber = %request.subscriber_session, "event delivered"),
                    Err(e) => {
                        warn!(subscriber = %request.subscriber_session, error = %e, "event delivery failed, one-shot subscription retained");
                        self.subscriptions.insert(id, claimed);
                    }
                }
                continue;
            }

            let message = render_template(&request.message_template, &event);
            if let Err(e) = self
                .helper
                .send_message(&request.subscriber_session, &message)
                .await
            {
                warn!(subscriber = %request.subscriber_session, error = %e, "event delivery failed");
            } else {
                debug!(subscriber = %request.subscriber_session, "event delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangedField;
    use ai_session::{SessionConfig, SessionManager};

    fn sample_event(session_name: &str) -> AgentEvent {
        AgentEvent {
            id: Uuid::new_v4().to_string(),
            event_type: EventType::AgentStatusChanged,
            timestamp: Utc::now(),
            team_id: None,
            member_id: Some("m1".to_string()),
            session_name: session_name.to_string(),
            previous_value: "inactive".to_string(),
            new_value: "active".to_string(),
            changed_field: ChangedField::AgentStatus,
        }
    }

    #[tokio::test]
    async fn one_shot_subscription_is_removed_after_delivery() {
        let backend = Arc::new(SessionManager::new());
        backend
            .create_session(SessionConfig::new("subscriber-1", std::env::temp_dir()))
            .await
            .unwrap();
        let helper = Arc::new(SessionCommandHelper::new(backend.clone()));
        let bus = EventBus::new(helper);

        let id = bus
            .create_subscription(SubscriptionRequest::new(
                "subscriber-1",
                vec![EventType::AgentStatusChanged],
                "{sessionName} is now {newValue}",
            ))
            .unwrap();

        bus.publish(sample_event("agent-x")).await;
        assert!(!bus.subscriptions.contains_key(&id));

        backend.kill_session("subscriber-1").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_matching_events_deliver_only_once() {
        let backend = Arc::new(SessionManager::new());
        backend
            .create_session(SessionConfig::new("subscriber-6", std::env::temp_dir()))
            .await
            .unwrap();
        let helper = Arc::new(SessionCommandHelper::new(backend.clone()));
        let bus = Arc::new(EventBus::new(helper));

        let id = bus
            .create_subscription(SubscriptionRequest::new(
                "subscriber-6",
                vec![EventType::AgentStatusChanged],
                "{memberName} idle",
            ))
            .unwrap();

        let (bus_a, bus_b) = (bus.clone(), bus.clone());
        let (ev_a, ev_b) = (sample_event("agent-six"), sample_event("agent-six"));
        tokio::join!(bus_a.publish(ev_a), bus_b.publish(ev_b));

        assert!(!bus.subscriptions.contains_key(&id));

        backend.kill_session("subscriber-6").await.unwrap();
    }

    #[test]
    fn create_subscription_rejects_empty_template() {
        let backend = Arc::new(SessionManager::new());
        let helper = Arc::new(SessionCommandHelper::new(backend));
        let bus = EventBus::new(helper);
        let result = bus.create_subscription(SubscriptionRequest::new(
            "s",
            vec![EventType::AgentStatusChanged],
            "",
        ));
        assert!(result.is_err());
    }

    #[test]
    fn template_renders_known_placeholders() {
        let event = sample_event("agent-x");
        let rendered = render_template("{sessionName}: {previousValue} -> {newValue}", &event);
        assert_eq!(rendered, "agent-x: inactive -> active");
    }
}
