use callbridge_core::{Call, CallDirection, CallStatus};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CallRow {
    pub id: String,
    pub direction: String,
    pub status: String,
    pub phone_number: String,
    pub from_number: Option<String>,
    pub telephony_leg_id: Option<String>,
    pub voice_session_id: Option<String>,
    pub join_target: Option<String>,
    pub prompt: String,
    pub transcript: String,
    pub summary: Option<String>,
    pub analysis_error: Option<String>,
    pub analysis_dispatched_at: Option<i64>,
    pub error_detail: Option<String>,
    pub metadata: String,
    pub last_telephony_sequence: Option<i64>,
    pub voice_session_ended_at: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    pub updated_at: i64,
}

impl CallRow {
    pub fn into_domain(self) -> Result<Call, DbError> {
        let corrupt = |reason: String| DbError::CorruptRow {
            id: self.id.clone(),
            reason,
        };

        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(format!("id: {}", e)))?;
        let direction = CallDirection::parse(&self.direction)
            .ok_or_else(|| corrupt(format!("unknown direction '{}'", self.direction)))?;
        let status = CallStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let prompt =
            serde_json::from_str(&self.prompt).map_err(|e| corrupt(format!("prompt: {}", e)))?;
        let transcript = serde_json::from_str(&self.transcript)
            .map_err(|e| corrupt(format!("transcript: {}", e)))?;
        let summary = self
            .summary
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("summary: {}", e)))?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| corrupt(format!("metadata: {}", e)))?;

        Ok(Call {
            id,
            direction,
            status,
            phone_number: self.phone_number,
            from_number: self.from_number,
            telephony_leg_id: self.telephony_leg_id,
            voice_session_id: self.voice_session_id,
            join_target: self.join_target,
            prompt,
            transcript,
            summary,
            analysis_error: self.analysis_error,
            analysis_dispatched_at: self.analysis_dispatched_at.map(millis_to_datetime),
            error_detail: self.error_detail,
            metadata,
            last_telephony_sequence: self
                .last_telephony_sequence
                .and_then(|s| u64::try_from(s).ok()),
            voice_session_ended_at: self.voice_session_ended_at.map(millis_to_datetime),
            created_at: millis_to_datetime(self.created_at),
            started_at: self.started_at.map(millis_to_datetime),
            ended_at: self.ended_at.map(millis_to_datetime),
            updated_at: millis_to_datetime(self.updated_at),
        })
    }
}

impl TryFrom<&Call> for CallRow {
    type Error = serde_json::Error;

    fn try_from(call: &Call) -> Result<Self, Self::Error> {
        Ok(Self {
            id: call.id.to_string(),
            direction: call.direction.as_str().to_string(),
            status: call.status.as_str().to_string(),
            phone_number: call.phone_number.clone(),
            from_number: call.from_number.clone(),
            telephony_leg_id: call.telephony_leg_id.clone(),
            voice_session_id: call.voice_session_id.clone(),
            join_target: call.join_target.clone(),
            prompt: serde_json::to_string(&call.prompt)?,
            transcript: serde_json::to_string(&call.transcript)?,
            summary: call
                .summary
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            analysis_error: call.analysis_error.clone(),
            analysis_dispatched_at: call.analysis_dispatched_at.map(datetime_to_millis),
            error_detail: call.error_detail.clone(),
            metadata: serde_json::to_string(&call.metadata)?,
            last_telephony_sequence: call
                .last_telephony_sequence
                .and_then(|s| i64::try_from(s).ok()),
            voice_session_ended_at: call.voice_session_ended_at.map(datetime_to_millis),
            created_at: datetime_to_millis(call.created_at),
            started_at: call.started_at.map(datetime_to_millis),
            ended_at: call.ended_at.map(datetime_to_millis),
            updated_at: datetime_to_millis(call.updated_at),
        })
    }
}

fn millis_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts).single().unwrap_or_default()
}

fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
