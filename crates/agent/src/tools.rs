use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono_tz::Tz;
use crmbot_core::action_log::ActionKind;
use crmbot_core::domain::lead::{NewLead, StatusUpdate};
use crmbot_core::domain::visit::NewVisit;
use crmbot_core::validation::{
    validate_city, validate_lead_id, validate_name, validate_phone, validate_status,
    validate_timestamp, ValidationReport,
};
use crmbot_crm::{CrmClient, CrmError};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::llm::ToolSchema;

pub const CREATE_LEAD_TOOL: &str = "create_lead_tool";
pub const CREATE_VISIT_TOOL: &str = "create_visit_tool";
pub const UPDATE_LEAD_STATUS_TOOL: &str = "update_lead_status_tool";

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> ToolSchema;
    /// Returns the JSON handed back to the model. Operation failures are
    /// reported inside the value (an `error` field); `Err` is reserved for
    /// arguments the tool cannot interpret at all.
    async fn execute(&self, input: Value) -> Result<Value>;
}

/// One executed tool call as seen by the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
    pub output: Value,
    pub failed: bool,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Box::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    /// Registers the three CRM tools.
    pub fn crm(crm: CrmClient, timezone: Tz, clock: Arc<dyn Clock>) -> Self {
        let mut registry = Self::default();
        registry.register(CreateLeadTool::new(crm.clone()));
        registry.register(CreateVisitTool::new(crm.clone(), timezone, clock));
        registry.register(UpdateLeadStatusTool::new(crm));
        registry
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order.iter().filter_map(|name| self.tools.get(name)).map(|tool| tool.schema()).collect()
    }

    pub async fn execute(&self, name: &str, raw_arguments: &str) -> ToolInvocation {
        let arguments = if raw_arguments.trim().is_empty() {
            Ok(Value::Object(Map::new()))
        } else {
            serde_json::from_str::<Value>(raw_arguments)
        };

        let (arguments, output) = match (self.tools.get(name), arguments) {
            (None, arguments) => (
                arguments.unwrap_or(Value::Null),
                error_output(format!("unknown tool `{name}`"), "unknown_tool"),
            ),
            (Some(_), Err(error)) => (
                Value::String(raw_arguments.to_string()),
                error_output(format!("could not decode arguments for `{name}`: {error}"), "arguments"),
            ),
            (Some(tool), Ok(arguments)) => {
                let output = match tool.execute(arguments.clone()).await {
                    Ok(output) => output,
                    Err(error) => error_output(error.to_string(), "arguments"),
                };
                (arguments, output)
            }
        };

        let failed = output.get("error").is_some();
        if failed {
            warn!(event_name = "agent.tool.failed", tool = name, output = %output, "tool call failed");
        } else {
            info!(event_name = "agent.tool.succeeded", tool = name, "tool call succeeded");
        }

        ToolInvocation { name: name.to_string(), arguments, output, failed }
    }
}

fn error_output(message: String, kind: &str) -> Value {
    json!({ "error": message, "error_kind": kind })
}

fn crm_error_output(error: &CrmError) -> Value {
    json!({ "error": error.to_string(), "error_kind": error.kind() })
}

fn object_arguments(tool: &str, input: &Value) -> Result<Map<String, Value>> {
    match input {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => bail!("arguments for `{tool}` must be a JSON object, got `{other}`"),
    }
}

/// Models sometimes send numbers for identifiers; those are accepted as text.
fn text_argument(arguments: &Map<String, Value>, key: &str) -> Option<String> {
    match arguments.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// The arguments exactly as received, restricted to the tool's own fields.
fn raw_entities(arguments: &Map<String, Value>, fields: &[&str]) -> Value {
    let entities = fields
        .iter()
        .map(|field| (field.to_string(), arguments.get(*field).cloned().unwrap_or(Value::Null)))
        .collect::<Map<_, _>>();
    Value::Object(entities)
}

fn string_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

pub struct CreateLeadTool {
    crm: CrmClient,
}

impl CreateLeadTool {
    pub fn new(crm: CrmClient) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl Tool for CreateLeadTool {
    fn name(&self) -> &'static str {
        CREATE_LEAD_TOOL
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: CREATE_LEAD_TOOL.to_string(),
            description: "Create a new lead in the CRM. Pass \"\" for any field the user did not give."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": string_property("Full name of the lead."),
                    "phone": string_property("Indian mobile number, optionally +91 prefixed."),
                    "city": string_property("City where the lead lives."),
                    "source": string_property("Where the lead came from, e.g. website or referral."),
                },
                "required": ["name", "phone", "city"],
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let arguments = object_arguments(CREATE_LEAD_TOOL, &input)?;
        let name = text_argument(&arguments, "name");
        let phone = text_argument(&arguments, "phone");
        let city = text_argument(&arguments, "city");
        let source = text_argument(&arguments, "source");

        let mut report = ValidationReport::new();
        let name = report.require("name", name.as_deref()).and_then(|v| report.check(validate_name(v)));
        let phone =
            report.require("phone", phone.as_deref()).and_then(|v| report.check(validate_phone(v)));
        let city = report.require("city", city.as_deref()).and_then(|v| report.check(validate_city(v)));

        let (Some(name), Some(phone), Some(city)) = (name, phone, city) else {
            let entities = raw_entities(&arguments, &["name", "phone", "city", "source"]);
            let error =
                self.crm.reject(ActionKind::LeadCreate, entities, report.into_errors()).await;
            return Ok(crm_error_output(&error));
        };

        let lead = NewLead { name, phone, city, source };
        Ok(match self.crm.create_lead(&lead).await {
            Ok(body) => body,
            Err(error) => crm_error_output(&error),
        })
    }
}

pub struct CreateVisitTool {
    crm: CrmClient,
    timezone: Tz,
    clock: Arc<dyn Clock>,
}

impl CreateVisitTool {
    pub fn new(crm: CrmClient, timezone: Tz, clock: Arc<dyn Clock>) -> Self {
        Self { crm, timezone, clock }
    }
}

#[async_trait]
impl Tool for CreateVisitTool {
    fn name(&self) -> &'static str {
        CREATE_VISIT_TOOL
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: CREATE_VISIT_TOOL.to_string(),
            description: "Schedule a visit for an existing lead.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "lead_id": string_property("Identifier of the lead (UUID or number)."),
                    "visit_time": string_property(
                        "When the visit happens: ISO 8601 (2025-10-10T16:00:00) or the user's words (tomorrow at 4 PM)."
                    ),
                    "notes": string_property("Optional notes for the visit."),
                },
                "required": ["lead_id", "visit_time"],
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let arguments = object_arguments(CREATE_VISIT_TOOL, &input)?;
        let lead_id = text_argument(&arguments, "lead_id").unwrap_or_default();
        let visit_time = text_argument(&arguments, "visit_time").unwrap_or_default();
        let notes = text_argument(&arguments, "notes");
        let now = self.clock.now().with_timezone(&self.timezone);

        let mut report = ValidationReport::new();
        let lead_id = report.check(validate_lead_id(&lead_id));
        let visit_time = report.check(validate_timestamp(&visit_time, now));

        let (Some(lead_id), Some(visit_time)) = (lead_id, visit_time) else {
            let entities = raw_entities(&arguments, &["lead_id", "visit_time", "notes"]);
            let error =
                self.crm.reject(ActionKind::VisitSchedule, entities, report.into_errors()).await;
            return Ok(crm_error_output(&error));
        };

        let visit = NewVisit { lead_id, visit_time, notes };
        Ok(match self.crm.schedule_visit(&visit).await {
            Ok(body) => body,
            Err(error) => crm_error_output(&error),
        })
    }
}

pub struct UpdateLeadStatusTool {
    crm: CrmClient,
}

impl UpdateLeadStatusTool {
    pub fn new(crm: CrmClient) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl Tool for UpdateLeadStatusTool {
    fn name(&self) -> &'static str {
        UPDATE_LEAD_STATUS_TOOL
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: UPDATE_LEAD_STATUS_TOOL.to_string(),
            description: "Update the status of an existing lead.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "lead_id": string_property("Identifier of the lead (UUID or number)."),
                    "status": {
                        "type": "string",
                        "description": "New status.",
                        "enum": ["NEW", "IN_PROGRESS", "FOLLOW_UP", "WON", "LOST"],
                    },
                    "notes": string_property("Optional notes for this update."),
                },
                "required": ["lead_id", "status"],
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let arguments = object_arguments(UPDATE_LEAD_STATUS_TOOL, &input)?;
        let lead_id = text_argument(&arguments, "lead_id").unwrap_or_default();
        let status = text_argument(&arguments, "status").unwrap_or_default();
        let notes = text_argument(&arguments, "notes");

        let mut report = ValidationReport::new();
        let lead_id = report.check(validate_lead_id(&lead_id));
        let status = report.check(validate_status(&status));

        let (Some(lead_id), Some(status)) = (lead_id, status) else {
            let entities = raw_entities(&arguments, &["status", "notes"]);
            let error =
                self.crm.reject(ActionKind::LeadUpdate, entities, report.into_errors()).await;
            return Ok(crm_error_output(&error));
        };

        let update = StatusUpdate { status, notes };
        Ok(match self.crm.update_lead_status(&lead_id, &update).await {
            Ok(body) => body,
            Err(error) => crm_error_output(&error),
        })
    }
}
