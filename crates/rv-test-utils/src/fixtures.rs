//! Session fixtures that go through the public API.

use crate::server_harness::TestRvServer;
use common::types::{CandidateId, ParticipantId, SessionId};
use reqwest::{Client, Response};
use rv_service::models::{Candidate, SessionJoinedResponse};
use serde::Serialize;
use serde_json::json;

/// A participant and the bearer token issued to them.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    pub id: ParticipantId,
    pub display_name: String,
    pub token: String,
    client: Client,
}

impl TestParticipant {
    fn from_response(joined: SessionJoinedResponse) -> Self {
        Self {
            id: joined.participant.id,
            display_name: joined.participant.display_name,
            token: joined.token,
            client: Client::new(),
        }
    }

    pub async fn get(&self, server: &TestRvServer, path: &str) -> Result<Response, anyhow::Error> {
        Ok(self
            .client
            .get(format!("{}{}", server.url(), path))
            .bearer_auth(&self.token)
            .send()
            .await?)
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        server: &TestRvServer,
        path: &str,
        body: &B,
    ) -> Result<Response, anyhow::Error> {
        Ok(self
            .client
            .post(format!("{}{}", server.url(), path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?)
    }

    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        server: &TestRvServer,
        path: &str,
        body: &B,
    ) -> Result<Response, anyhow::Error> {
        Ok(self
            .client
            .patch(format!("{}{}", server.url(), path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?)
    }

    pub async fn delete(
        &self,
        server: &TestRvServer,
        path: &str,
    ) -> Result<Response, anyhow::Error> {
        Ok(self
            .client
            .delete(format!("{}{}", server.url(), path))
            .bearer_auth(&self.token)
            .send()
            .await?)
    }
}

/// A session created through `POST /api/v1/sessions`.
#[derive(Debug, Clone)]
pub struct TestSession {
    pub id: SessionId,
    pub owner: TestParticipant,
}

impl TestSession {
    pub async fn create(
        server: &TestRvServer,
        category: &str,
        owner_name: &str,
    ) -> Result<Self, anyhow::Error> {
        let response = Client::new()
            .post(format!("{}/api/v1/sessions", server.url()))
            .json(&json!({ "category": category, "display_name": owner_name }))
            .send()
            .await?;
        anyhow::ensure!(
            response.status() == 201,
            "create session returned {}",
            response.status()
        );

        let joined: SessionJoinedResponse = response.json().await?;
        Ok(Self {
            id: joined.session_id,
            owner: TestParticipant::from_response(joined),
        })
    }

    /// Path under this session, e.g. `path("/votes")`.
    pub fn path(&self, suffix: &str) -> String {
        format!("/api/v1/sessions/{}{}", self.id, suffix)
    }

    pub async fn join(
        &self,
        server: &TestRvServer,
        display_name: &str,
    ) -> Result<TestParticipant, anyhow::Error> {
        let response = Client::new()
            .post(format!("{}{}", server.url(), self.path("/participants")))
            .json(&json!({ "display_name": display_name }))
            .send()
            .await?;
        anyhow::ensure!(
            response.status() == 201,
            "join returned {}",
            response.status()
        );

        let joined: SessionJoinedResponse = response.json().await?;
        Ok(TestParticipant::from_response(joined))
    }

    pub async fn add_candidate(
        &self,
        server: &TestRvServer,
        by: &TestParticipant,
        name: &str,
    ) -> Result<CandidateId, anyhow::Error> {
        let response = by
            .post(server, &self.path("/candidates"), &json!({ "name": name }))
            .await?;
        anyhow::ensure!(
            response.status() == 201,
            "add candidate returned {}",
            response.status()
        );

        let candidate: Candidate = response.json().await?;
        Ok(candidate.id)
    }
}
