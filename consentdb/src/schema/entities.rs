//! Built-in entity definitions.

use super::field::Field;
use super::table::{Index, TableDefinition, UniqueConstraint};

pub const SUBJECT: &str = "subject";
pub const CONSENT_PURPOSE: &str = "consentPurpose";
pub const CONSENT_POLICY: &str = "consentPolicy";
pub const DOMAIN: &str = "domain";
pub const GEO_LOCATION: &str = "geoLocation";
pub const CONSENT: &str = "consent";
pub const CONSENT_PURPOSE_JUNCTION: &str = "consentPurposeJunction";
pub const CONSENT_RECORD: &str = "consentRecord";
pub const CONSENT_GEO_LOCATION: &str = "consentGeoLocation";
pub const CONSENT_WITHDRAWAL: &str = "consentWithdrawal";
pub const AUDIT_LOG: &str = "auditLog";

/// Every built-in definition, in a fixed order.
pub fn builtin_definitions() -> Vec<TableDefinition> {
    vec![
        subject(),
        consent_purpose(),
        consent_policy(),
        domain(),
        geo_location(),
        consent(),
        consent_purpose_junction(),
        consent_record(),
        consent_geo_location(),
        consent_withdrawal(),
        audit_log(),
    ]
}

fn updated_at() -> Field {
    Field::timestamp().refreshed_on_update()
}

fn subject() -> TableDefinition {
    TableDefinition::new(SUBJECT, "sub", 1)
        .field("externalId", Field::string().unique())
        .field("identityProvider", Field::string())
        .field("lastIpAddress", Field::string())
        .field("subjectTimezone", Field::timezone())
        .field("createdAt", Field::timestamp())
        .field("updatedAt", updated_at())
}

fn consent_purpose() -> TableDefinition {
    TableDefinition::new(CONSENT_PURPOSE, "pur", 1)
        .field("code", Field::string().required().unique())
        .field("name", Field::string().required())
        .field("description", Field::string())
        .field("isEssential", Field::boolean().required().default_literal(false))
        .field("dataCategory", Field::string())
        .field("legalBasis", Field::string())
        .field("isActive", Field::boolean().required().default_literal(true))
        .field("createdAt", Field::timestamp())
        .field("updatedAt", updated_at())
}

fn consent_policy() -> TableDefinition {
    TableDefinition::new(CONSENT_POLICY, "pol", 1)
        .field("version", Field::string().required())
        .field("type", Field::string().required())
        .field("name", Field::string().required())
        .field("effectiveDate", Field::date().required())
        .field("expirationDate", Field::date())
        .field("content", Field::string().required())
        .field("contentHash", Field::string().required())
        .field("isActive", Field::boolean().required().default_literal(true))
        .field("createdAt", Field::timestamp())
        .unique_constraint(UniqueConstraint::new("consent_policy_type_version_uq", &["type", "version"]))
}

fn domain() -> TableDefinition {
    TableDefinition::new(DOMAIN, "dom", 1)
        .field("name", Field::string().required().unique())
        .field("description", Field::string())
        .field("allowedOrigins", Field::json_text())
        .field("isVerified", Field::boolean().required().default_literal(true))
        .field("isActive", Field::boolean().required().default_literal(true))
        .field("createdAt", Field::timestamp())
        .field("updatedAt", updated_at())
}

fn geo_location() -> TableDefinition {
    TableDefinition::new(GEO_LOCATION, "geo", 1)
        .field("countryCode", Field::string().required())
        .field("countryName", Field::string().required())
        .field("regionCode", Field::string())
        .field("regionName", Field::string())
        .field("regulatoryZones", Field::json_text())
        .field("createdAt", Field::timestamp())
        .index(Index::new("geo_location_country_idx", &["countryCode"]))
}

fn consent() -> TableDefinition {
    TableDefinition::new(CONSENT, "cns", 3)
        .field("subjectId", Field::string().required().references(SUBJECT, "id"))
        .field("domainId", Field::string().required().references(DOMAIN, "id"))
        .field("policyId", Field::string().references(CONSENT_POLICY, "id"))
        .field("purposeIds", Field::json_text().required())
        .field("metadata", Field::json_text())
        .field("ipAddress", Field::string())
        .field("userAgent", Field::string())
        .field("status", Field::string().required().default_literal("active"))
        .field("withdrawalReason", Field::string())
        .field("givenAt", Field::timestamp())
        .field("validUntil", Field::date())
        .field("isActive", Field::boolean().required().default_literal(true))
        .index(Index::new("consent_subject_idx", &["subjectId"]))
        .index(Index::new("consent_domain_idx", &["domainId"]))
}

fn consent_purpose_junction() -> TableDefinition {
    TableDefinition::new(CONSENT_PURPOSE_JUNCTION, "pjx", 4)
        .field("consentId", Field::string().required().references(CONSENT, "id"))
        .field("purposeId", Field::string().required().references(CONSENT_PURPOSE, "id"))
        .field("status", Field::string().required().default_literal("active"))
        .field("createdAt", Field::timestamp())
        .unique_constraint(UniqueConstraint::new(
            "consent_purpose_junction_uq",
            &["consentId", "purposeId"],
        ))
}

fn consent_record() -> TableDefinition {
    TableDefinition::new(CONSENT_RECORD, "rec", 4)
        .field("subjectId", Field::string().required().references(SUBJECT, "id"))
        .field("consentId", Field::string().references(CONSENT, "id"))
        .field("actionType", Field::string().required())
        .field("details", Field::json_text())
        .field("createdAt", Field::timestamp())
}

fn consent_geo_location() -> TableDefinition {
    TableDefinition::new(CONSENT_GEO_LOCATION, "cgl", 4)
        .field("consentId", Field::string().required().references(CONSENT, "id"))
        .field("geoLocationId", Field::string().required().references(GEO_LOCATION, "id"))
        .field("createdAt", Field::timestamp())
}

fn consent_withdrawal() -> TableDefinition {
    TableDefinition::new(CONSENT_WITHDRAWAL, "wdr", 4)
        .field("consentId", Field::string().required().references(CONSENT, "id"))
        .field("withdrawalReason", Field::string())
        .field("withdrawalMethod", Field::string().required().default_literal("api"))
        .field("actor", Field::string())
        .field("metadata", Field::json_text())
        .field("createdAt", Field::timestamp())
}

fn audit_log() -> TableDefinition {
    TableDefinition::new(AUDIT_LOG, "log", 5)
        .field("entityType", Field::string().required())
        .field("entityId", Field::string().required())
        .field("actionType", Field::string().required())
        .field("subjectId", Field::string().references(SUBJECT, "id"))
        .field("ipAddress", Field::string())
        .field("userAgent", Field::string())
        .field("changes", Field::json_text())
        .field("metadata", Field::json_text())
        .field("createdAt", Field::timestamp())
        .field("eventTimezone", Field::timezone().required().default_literal("UTC"))
        .index(Index::new("audit_log_entity_idx", &["entityType", "entityId"]))
}
