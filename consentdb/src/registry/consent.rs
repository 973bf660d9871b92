//! Consent workflows composed from the generic record operations.
//!
//! Each find-or-create runs inside an adapter transaction so that concurrent
//! callers cannot both miss and both insert. Unique constraints on `domain.name`
//! and `subject.externalId` back this up on backends with weaker isolation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::adapter::Adapter;
use crate::errors::{RegistryError, ValidationError};
use crate::query::{Record, Where};
use crate::schema::entities::{CONSENT, CONSENT_RECORD, DOMAIN, SUBJECT};
use crate::validate::TypedRecord;

use super::{Pipeline, create_record, find_record, id_of};

/// Ways a caller can identify a subject.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLookup {
    /// Internal subject id; also used as the id when the subject is created.
    pub subject_id: Option<String>,
    pub external_id: Option<String>,
    pub identity_provider: Option<String>,
    pub ip_address: Option<String>,
    pub timezone: Option<String>,
}

impl SubjectLookup {
    pub fn by_id(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }

    pub fn by_external_id(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            ..Self::default()
        }
    }
}

/// Input to [`create_consent`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsent {
    pub domain: String,
    pub subject: SubjectLookup,
    pub purpose_ids: Vec<String>,
    pub policy_id: Option<String>,
    pub metadata: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

fn normalize_domain(name: &str) -> Result<String, ValidationError> {
    let name = name.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(ValidationError::single(
            "name",
            "validation.required",
            "domain name must not be empty",
        ));
    }
    Ok(name)
}

fn insert_opt(record: &mut Record, field: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        record.insert(field.to_string(), value.into());
    }
}

/// Returns the domain named `name` (trimmed, lower-cased), creating it if absent.
pub async fn find_or_create_domain<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    name: &str,
) -> Result<TypedRecord, RegistryError> {
    let name = normalize_domain(name)?;
    adapter
        .transaction(async move |tx| -> Result<TypedRecord, RegistryError> {
            let conditions = [Where::eq("name", name.as_str())];
            if let Some(existing) = find_record(pipeline, tx, DOMAIN, &conditions).await? {
                return Ok(existing);
            }
            let mut data = Record::new();
            data.insert("name".into(), Value::String(name));
            let created = create_record(pipeline, tx, DOMAIN, data).await?;
            log::info!("created domain {}", created.id().unwrap_or_default());
            Ok(created)
        })
        .await
}

/// Resolves a subject by internal and/or external id, creating it when
/// neither matches.
///
/// When both ids are given and match different subjects the call fails with
/// [`RegistryError::Conflict`].
pub async fn find_or_create_subject<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    lookup: SubjectLookup,
) -> Result<TypedRecord, RegistryError> {
    adapter
        .transaction(async move |tx| -> Result<TypedRecord, RegistryError> {
            let by_id = match &lookup.subject_id {
                Some(id) => find_record(pipeline, tx, SUBJECT, &[Where::eq("id", id.as_str())]).await?,
                None => None,
            };
            let by_external = match &lookup.external_id {
                Some(external) => {
                    find_record(pipeline, tx, SUBJECT, &[Where::eq("externalId", external.as_str())]).await?
                }
                None => None,
            };

            match (by_id, by_external) {
                (Some(internal), Some(external)) if internal.id() != external.id() => Err(RegistryError::Conflict {
                    message: format!(
                        "subject id `{}` and external id `{}` belong to different subjects",
                        internal.id().unwrap_or_default(),
                        lookup.external_id.as_deref().unwrap_or_default()
                    ),
                }),
                (Some(found), _) | (None, Some(found)) => Ok(found),
                (None, None) => {
                    let mut data = Record::new();
                    insert_opt(&mut data, "id", lookup.subject_id);
                    insert_opt(&mut data, "externalId", lookup.external_id);
                    insert_opt(&mut data, "identityProvider", lookup.identity_provider);
                    insert_opt(&mut data, "lastIpAddress", lookup.ip_address);
                    insert_opt(&mut data, "subjectTimezone", lookup.timezone);
                    create_record(pipeline, tx, SUBJECT, data).await
                }
            }
        })
        .await
}

/// Records a consent given by a subject on a domain.
///
/// Domain and subject are resolved (or created), the `consent` row is inserted
/// and a `consentRecord` of action `given` is appended, all in one transaction.
pub async fn create_consent<A: Adapter>(
    pipeline: &Pipeline,
    adapter: &A,
    consent: NewConsent,
) -> Result<TypedRecord, RegistryError> {
    adapter
        .transaction(async move |tx| -> Result<TypedRecord, RegistryError> {
            let domain = find_or_create_domain(pipeline, tx, &consent.domain).await?;
            let subject = find_or_create_subject(pipeline, tx, consent.subject).await?;
            let domain_id = id_of(DOMAIN, &domain)?;
            let subject_id = id_of(SUBJECT, &subject)?;

            let mut data = Record::new();
            data.insert("subjectId".into(), Value::String(subject_id.clone()));
            data.insert("domainId".into(), Value::String(domain_id));
            data.insert("purposeIds".into(), json!(consent.purpose_ids));
            insert_opt(&mut data, "policyId", consent.policy_id.clone());
            insert_opt(&mut data, "metadata", consent.metadata);
            insert_opt(&mut data, "ipAddress", consent.ip_address);
            insert_opt(&mut data, "userAgent", consent.user_agent);
            insert_opt(
                &mut data,
                "validUntil",
                consent
                    .valid_until
                    .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            let created = create_record(pipeline, tx, CONSENT, data).await?;
            let consent_id = id_of(CONSENT, &created)?;

            let mut entry = Record::new();
            entry.insert("subjectId".into(), Value::String(subject_id));
            entry.insert("consentId".into(), Value::String(consent_id));
            entry.insert("actionType".into(), Value::String("given".into()));
            entry.insert(
                "details".into(),
                json!({
                    "purposeIds": consent.purpose_ids,
                    "policyId": consent.policy_id,
                }),
            );
            create_record(pipeline, tx, CONSENT_RECORD, entry).await?;
            Ok(created)
        })
        .await
}
