//! E-signature subsystem collaborator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::AggregateId;

use crate::error::{OrchestrationError, Result};

/// Contract the orchestrator requires from the e-signature subsystem.
#[async_trait]
pub trait ESignService: Send + Sync {
    /// True once every required party has signed the deal contract.
    async fn all_required_parties_signed(&self, deal_id: AggregateId) -> Result<bool>;

    /// Generates the completion act and a signing link for the client.
    async fn request_completion_act(&self, deal_id: AggregateId) -> Result<String>;
}

#[derive(Debug, Default)]
struct InMemoryESignState {
    signed: HashSet<AggregateId>,
    acts_requested: HashMap<AggregateId, u32>,
    fail_on_act: bool,
}

/// In-memory e-signature service for tests.
#[derive(Clone, Default)]
pub struct InMemoryESignService {
    state: Arc<RwLock<InMemoryESignState>>,
}

impl InMemoryESignService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a deal's contract as fully signed.
    pub fn set_all_signed(&self, deal_id: AggregateId, signed: bool) {
        let mut state = self.state.write().unwrap();
        if signed {
            state.signed.insert(deal_id);
        } else {
            state.signed.remove(&deal_id);
        }
    }

    pub fn set_fail_on_act(&self, fail: bool) {
        self.state.write().unwrap().fail_on_act = fail;
    }

    /// Number of completion acts requested for a deal.
    pub fn act_request_count(&self, deal_id: AggregateId) -> u32 {
        self.state
            .read()
            .unwrap()
            .acts_requested
            .get(&deal_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ESignService for InMemoryESignService {
    async fn all_required_parties_signed(&self, deal_id: AggregateId) -> Result<bool> {
        Ok(self.state.read().unwrap().signed.contains(&deal_id))
    }

    async fn request_completion_act(&self, deal_id: AggregateId) -> Result<String> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_act {
            return Err(OrchestrationError::ESign(
                "act generation failed".to_string(),
            ));
        }
        *state.acts_requested.entry(deal_id).or_insert(0) += 1;
        Ok(format!("https://esign.example/act/{deal_id}"))
    }
}
