//! Turns jobs into routed accept/reject records.

use tracing::info;

use crate::policy::{PipelineConfig, Policy, PolicyError};
use crate::verifier::Verifier;

use super::job::{
    Dispatch, ExecutionRecord, Job, Record, RejectionRecord, STATUS_SAFE, STATUS_UNSAFE,
};

/// Screens jobs with a [`Verifier`] and routes them by topic.
///
/// The screener never publishes; it only decides where a job goes.
#[derive(Debug, Clone)]
pub struct Screener {
    verifier: Verifier,
    topics: PipelineConfig,
}

impl Screener {
    pub fn new(verifier: Verifier, topics: PipelineConfig) -> Self {
        Self { verifier, topics }
    }

    /// Build a screener from a policy's rules and pipeline section.
    pub fn from_policy(policy: &Policy) -> Result<Self, PolicyError> {
        Ok(Self::new(Verifier::new(policy)?, policy.pipeline()))
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Verify a job and build the record for its destination topic.
    pub fn screen(&self, job: &Job) -> Dispatch {
        let job_id = job.job_id();

        let Some(code) = job.code.as_deref() else {
            info!(job = %job_id, "job has no code, blocking");
            return self.reject(job, "Job is missing code.".to_string());
        };

        let verdict = self.verifier.check(code, &job.language);
        let reason = verdict.reason();
        if !verdict.is_safe() {
            info!(job = %job_id, reason = %reason, "job blocked");
            return self.reject(job, reason);
        }

        info!(job = %job_id, "job is safe");
        Dispatch {
            topic: self.topics.accepted_topic().to_string(),
            payload: Record::Execution(ExecutionRecord {
                job_id,
                status: STATUS_SAFE.to_string(),
                reason,
                output: None,
                language: job.language.clone(),
                code: code.to_string(),
                socket_id: job.socket_id.clone(),
            }),
        }
    }

    /// Decode and screen a raw payload.
    pub fn screen_payload(&self, payload: &[u8]) -> anyhow::Result<Dispatch> {
        let job = Job::decode(payload)?;
        Ok(self.screen(&job))
    }

    fn reject(&self, job: &Job, reason: String) -> Dispatch {
        let job_id = job.job_id();
        Dispatch {
            topic: self.topics.rejected_topic().to_string(),
            payload: Record::Rejection(RejectionRecord {
                id: job_id.clone(),
                job_id,
                status: STATUS_UNSAFE.to_string(),
                reason,
                output: None,
                language: job.language.clone(),
                code: job.code.clone(),
                socket_id: job.socket_id.clone(),
            }),
        }
    }
}

impl Default for Screener {
    fn default() -> Self {
        Self::new(Verifier::default(), PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_job_is_routed_for_execution() {
        let screener = Screener::default();
        let job = Job::new("j1", "import math\nprint(math.pi)\n", "python").with_socket("sock");
        let dispatch = screener.screen(&job);

        assert!(dispatch.is_safe());
        assert_eq!(dispatch.topic, "programiz_execution");
        assert_eq!(
            serde_json::to_value(&dispatch.payload).unwrap(),
            json!({
                "jobId": "j1",
                "status": "safe",
                "reason": "Safe to execute.",
                "output": null,
                "language": "python",
                "code": "import math\nprint(math.pi)\n",
                "socketId": "sock"
            })
        );
    }

    #[test]
    fn test_unsafe_job_is_blocked() {
        let screener = Screener::default();
        let dispatch = screener.screen(&Job::new(7, "import os\n", "python"));

        assert!(!dispatch.is_safe());
        assert_eq!(dispatch.topic, "blocked_exec");
        assert_eq!(dispatch.reason(), "Import of disallowed module 'os'.");
        match &dispatch.payload {
            Record::Rejection(r) => {
                assert_eq!(r.id, json!(7));
                assert_eq!(r.job_id, json!(7));
                assert_eq!(r.status, "unsafe");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_code_is_blocked() {
        let screener = Screener::default();
        let dispatch = screener.screen_payload(br#"{"id": "j2", "language": "c"}"#).unwrap();
        assert!(!dispatch.is_safe());
        assert_eq!(dispatch.reason(), "Job is missing code.");
    }

    #[test]
    fn test_custom_topics() {
        let policy = Policy::parse_str(
            "pipeline:\n  accepted_topic: run\n  rejected_topic: reject\n",
        )
        .unwrap();
        let screener = Screener::from_policy(&policy).unwrap();
        assert_eq!(screener.screen(&Job::new("a", "const x = 5;", "js")).topic, "run");
        assert_eq!(screener.screen(&Job::new("b", "x", "cobol")).topic, "reject");
    }

    #[test]
    fn test_undecodable_payload() {
        let screener = Screener::default();
        assert!(screener.screen_payload(b"{not json").is_err());
    }
}
