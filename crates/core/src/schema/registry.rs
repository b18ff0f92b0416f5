//! Built-in schema definitions, one per payload family.

use chrono::Utc;
use serde_json::{json, Value};

use super::{names, Schema, API_VERSION};

const EXAMPLE_JOB_ID: &str = "01890a5d-ac96-774b-bcce-b302099a8057";
const EXAMPLE_TIMESTAMP: &str = "2024-05-01T12:00:00Z";

fn schema(name: &str, definition: Value) -> Schema {
    Schema {
        name: name.to_string(),
        version: API_VERSION.to_string(),
        definition,
        last_updated: Utc::now(),
    }
}

/// Structure shared by single dispatches and batch members.
fn document_payload_structure() -> Value {
    json!({
        "type": "object",
        "required": [
            "dealName", "filePaths", "triggerType", "workflowType", "jobId",
            "priority", "timestamp", "retryCount", "maxRetries", "timeoutSeconds"
        ],
        "properties": {
            "dealName": { "type": "string", "minLength": 1 },
            "filePaths": {
                "type": "array",
                "minItems": 1,
                "items": { "type": "string", "minLength": 1 }
            },
            "triggerType": {
                "type": "string",
                "enum": ["manual", "file_upload", "scheduled", "api", "retry"]
            },
            "workflowType": {
                "type": "string",
                "enum": ["document_analysis", "batch_processing", "user_correction", "error_handling"]
            },
            "jobId": { "type": "string", "format": "uuid" },
            "priority": { "type": "string", "enum": ["high", "normal", "low"] },
            "timestamp": { "type": "string", "format": "date-time" },
            "retryCount": { "type": "integer", "minimum": 0 },
            "maxRetries": { "type": "integer", "minimum": 0 },
            "timeoutSeconds": { "type": "integer", "minimum": 1 },
            "metadata": { "type": "object" }
        }
    })
}

fn document_payload_example() -> Value {
    json!({
        "dealName": "Acme Tower",
        "filePaths": ["/deals/acme/rent_roll.pdf", "/deals/acme/t12.xlsx"],
        "triggerType": "manual",
        "workflowType": "document_analysis",
        "jobId": EXAMPLE_JOB_ID,
        "priority": "normal",
        "timestamp": EXAMPLE_TIMESTAMP,
        "retryCount": 0,
        "maxRetries": 3,
        "timeoutSeconds": 30,
        "metadata": { "source": "desktop" }
    })
}

fn with_examples(mut definition: Value, examples: Vec<Value>) -> Value {
    if let Some(obj) = definition.as_object_mut() {
        obj.insert("examples".into(), Value::Array(examples));
    }
    definition
}

fn document_webhook_payload() -> Schema {
    schema(
        names::DOCUMENT_WEBHOOK_PAYLOAD,
        with_examples(document_payload_structure(), vec![document_payload_example()]),
    )
}

fn webhook_result_payload() -> Schema {
    let definition = json!({
        "type": "object",
        "required": [
            "jobId", "dealName", "workflowType", "status", "processedDocuments",
            "totalDocuments", "averageConfidence", "processingTimeMs",
            "templatesUpdated", "timestamp"
        ],
        "properties": {
            "jobId": { "type": "string", "format": "uuid" },
            "dealName": { "type": "string", "minLength": 1 },
            "workflowType": {
                "type": "string",
                "enum": ["document_analysis", "batch_processing", "user_correction", "error_handling"]
            },
            "status": { "type": "string", "enum": ["processing", "completed", "failed"] },
            "processedDocuments": { "type": "integer", "minimum": 0, "maximum": 4294967295u64 },
            "totalDocuments": { "type": "integer", "minimum": 0, "maximum": 4294967295u64 },
            "averageConfidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "processingTimeMs": { "type": "integer", "minimum": 0 },
            "templatesUpdated": { "type": "array", "items": { "type": "string" } },
            "timestamp": { "type": "string", "format": "date-time" },
            "startedAt": { "type": "string", "format": "date-time" },
            "completedAt": { "type": "string", "format": "date-time" },
            "executionId": { "type": "string" },
            "progress": { "type": "integer", "minimum": 0, "maximum": 100 },
            "currentStep": { "type": "string" },
            "errorMessage": { "type": "string" },
            "errors": { "type": "array", "items": { "type": "string" } },
            "documentResults": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["documentPath", "status"],
                    "properties": {
                        "documentPath": { "type": "string" },
                        "status": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                        "fieldsExtracted": { "type": "integer", "minimum": 0 },
                        "error": { "type": "string" }
                    }
                }
            }
        }
    });
    let example = json!({
        "jobId": EXAMPLE_JOB_ID,
        "dealName": "Acme Tower",
        "workflowType": "document_analysis",
        "status": "completed",
        "processedDocuments": 2,
        "totalDocuments": 2,
        "averageConfidence": 0.92,
        "processingTimeMs": 48250,
        "templatesUpdated": ["underwriting_model.xlsx"],
        "timestamp": EXAMPLE_TIMESTAMP,
        "startedAt": "2024-05-01T11:59:11Z",
        "completedAt": EXAMPLE_TIMESTAMP,
        "executionId": "4711",
        "documentResults": [
            { "documentPath": "/deals/acme/rent_roll.pdf", "status": "completed", "confidence": 0.95, "fieldsExtracted": 42 },
            { "documentPath": "/deals/acme/t12.xlsx", "status": "completed", "confidence": 0.89, "fieldsExtracted": 118 }
        ]
    });
    schema(
        names::WEBHOOK_RESULT_PAYLOAD,
        with_examples(definition, vec![example]),
    )
}

fn error_handling_payload() -> Schema {
    let definition = json!({
        "type": "object",
        "required": ["jobId", "dealName", "errorType", "errorMessage", "timestamp"],
        "properties": {
            "jobId": { "type": "string", "format": "uuid" },
            "dealName": { "type": "string", "minLength": 1 },
            "errorType": { "type": "string", "minLength": 1 },
            "errorMessage": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" },
            "retryable": { "type": "boolean" },
            "executionId": { "type": "string" },
            "context": { "type": "object" }
        }
    });
    let example = json!({
        "jobId": EXAMPLE_JOB_ID,
        "dealName": "Acme Tower",
        "errorType": "extraction_failed",
        "errorMessage": "Could not parse page 3 of rent_roll.pdf",
        "timestamp": EXAMPLE_TIMESTAMP,
        "retryable": false,
        "context": { "node": "Extract Tables" }
    });
    schema(
        names::ERROR_HANDLING_PAYLOAD,
        with_examples(definition, vec![example]),
    )
}

fn user_correction_payload() -> Schema {
    let definition = json!({
        "type": "object",
        "required": ["jobId", "dealName", "fieldName", "correctedValue", "timestamp"],
        "properties": {
            "jobId": { "type": "string", "format": "uuid" },
            "dealName": { "type": "string", "minLength": 1 },
            "documentPath": { "type": "string" },
            "fieldName": { "type": "string", "minLength": 1 },
            "originalValue": {},
            "correctedValue": {},
            "correctedBy": { "type": "string" },
            "timestamp": { "type": "string", "format": "date-time" }
        }
    });
    let example = json!({
        "jobId": EXAMPLE_JOB_ID,
        "dealName": "Acme Tower",
        "documentPath": "/deals/acme/rent_roll.pdf",
        "fieldName": "occupancy_rate",
        "originalValue": 0.87,
        "correctedValue": 0.93,
        "correctedBy": "analyst@example.com",
        "timestamp": EXAMPLE_TIMESTAMP
    });
    schema(
        names::USER_CORRECTION_PAYLOAD,
        with_examples(definition, vec![example]),
    )
}

fn batch_processing_payload() -> Schema {
    let definition = json!({
        "type": "object",
        "required": ["batchId", "jobs", "totalJobs", "timestamp"],
        "properties": {
            "batchId": { "type": "string", "format": "uuid" },
            "jobs": { "type": "array", "minItems": 1, "items": document_payload_structure() },
            "totalJobs": { "type": "integer", "minimum": 1 },
            "priority": { "type": "string", "enum": ["high", "normal", "low"] },
            "timestamp": { "type": "string", "format": "date-time" }
        }
    });
    let example = json!({
        "batchId": "01890a5d-ac96-774b-bcce-b302099a8058",
        "jobs": [document_payload_example()],
        "totalJobs": 1,
        "priority": "normal",
        "timestamp": EXAMPLE_TIMESTAMP
    });
    schema(
        names::BATCH_PROCESSING_PAYLOAD,
        with_examples(definition, vec![example]),
    )
}

fn health_check_payload() -> Schema {
    let definition = json!({
        "type": "object",
        "required": ["status", "version", "timestamp"],
        "properties": {
            "status": { "type": "string", "enum": ["ok", "degraded", "down"] },
            "version": { "type": "string", "minLength": 1 },
            "timestamp": { "type": "string", "format": "date-time" },
            "services": { "type": "object" }
        }
    });
    let example = json!({
        "status": "ok",
        "version": "2.1.3",
        "timestamp": EXAMPLE_TIMESTAMP,
        "services": { "queue": "ok", "database": "ok" }
    });
    schema(
        names::HEALTH_CHECK_PAYLOAD,
        with_examples(definition, vec![example]),
    )
}

/// Every schema the validator registers at construction.
pub fn builtin_schemas() -> Vec<Schema> {
    vec![
        document_webhook_payload(),
        webhook_result_payload(),
        error_handling_payload(),
        user_correction_payload(),
        batch_processing_payload(),
        health_check_payload(),
    ]
}
