//! Runtime domain helpers: evaluation, function calls on remote objects, and handle release.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::ExecutionContextId;
use crate::session::CdpSession;

/// Mirror of the protocol's `Runtime.RemoteObject`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub subtype: Option<String>,
    pub class_name: Option<String>,
    pub value: Option<Value>,
    pub object_id: Option<String>,
    pub description: Option<String>,
}

impl RemoteObject {
    pub fn is_null(&self) -> bool {
        self.subtype.as_deref() == Some("null") || self.kind == "undefined"
    }

    pub fn value_or_null(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }
}

/// Receiver of a `Runtime.callFunctionOn` call.
#[derive(Clone, Debug)]
pub enum CallTarget {
    Object(String),
    Context(ExecutionContextId),
}

/// Argument for `Runtime.callFunctionOn`.
#[derive(Clone, Debug)]
pub enum CallArg {
    Value(Value),
    Object(String),
}

impl CallArg {
    fn to_protocol(&self) -> Value {
        match self {
            CallArg::Value(value) => json!({ "value": value }),
            CallArg::Object(id) => json!({ "objectId": id }),
        }
    }
}

pub async fn evaluate(
    session: &CdpSession,
    context: Option<ExecutionContextId>,
    expression: &str,
    return_by_value: bool,
) -> Result<RemoteObject, AdapterError> {
    let mut params = Map::new();
    params.insert("expression".into(), Value::String(expression.to_string()));
    params.insert("returnByValue".into(), Value::Bool(return_by_value));
    params.insert("awaitPromise".into(), Value::Bool(true));
    if let Some(context) = context {
        params.insert("contextId".into(), json!(context));
    }
    let response = session
        .send("Runtime.evaluate", Value::Object(params))
        .await?;
    parse_evaluation(response)
}

pub async fn call_function_on(
    session: &CdpSession,
    target: &CallTarget,
    declaration: &str,
    args: &[CallArg],
    return_by_value: bool,
) -> Result<RemoteObject, AdapterError> {
    let mut params = Map::new();
    params.insert(
        "functionDeclaration".into(),
        Value::String(declaration.to_string()),
    );
    params.insert(
        "arguments".into(),
        Value::Array(args.iter().map(CallArg::to_protocol).collect()),
    );
    params.insert("returnByValue".into(), Value::Bool(return_by_value));
    params.insert("awaitPromise".into(), Value::Bool(true));
    match target {
        CallTarget::Object(id) => {
            params.insert("objectId".into(), Value::String(id.clone()));
        }
        CallTarget::Context(context) => {
            params.insert("executionContextId".into(), json!(context));
        }
    }
    let response = session
        .send("Runtime.callFunctionOn", Value::Object(params))
        .await?;
    parse_evaluation(response)
}

/// Elements of a remote array, in index order.
pub async fn array_elements(
    session: &CdpSession,
    array_object_id: &str,
) -> Result<Vec<RemoteObject>, AdapterError> {
    let response = session
        .send(
            "Runtime.getProperties",
            json!({ "objectId": array_object_id, "ownProperties": true }),
        )
        .await?;

    let mut indexed: Vec<(usize, RemoteObject)> = response
        .get("result")
        .and_then(|v| v.as_array())
        .map(|props| {
            props
                .iter()
                .filter_map(|prop| {
                    let index = prop.get("name")?.as_str()?.parse::<usize>().ok()?;
                    let value = serde_json::from_value(prop.get("value")?.clone()).ok()?;
                    Some((index, value))
                })
                .collect()
        })
        .unwrap_or_default();
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, object)| object).collect())
}

/// Best-effort release; a closed session already dropped the handle.
pub async fn release_object(session: &CdpSession, object_id: &str) {
    if session.is_closed() {
        return;
    }
    let _ = session
        .send("Runtime.releaseObject", json!({ "objectId": object_id }))
        .await;
}

fn parse_evaluation(response: Value) -> Result<RemoteObject, AdapterError> {
    if let Some(details) = response.get("exceptionDetails") {
        let message = details
            .get("exception")
            .and_then(|ex| ex.get("description"))
            .and_then(|d| d.as_str())
            .or_else(|| details.get("text").and_then(|t| t.as_str()))
            .unwrap_or("script threw");
        return Err(AdapterError::new(AdapterErrorKind::Evaluation)
            .with_hint(message.to_string())
            .with_data(details.clone()));
    }

    let result = response.get("result").cloned().unwrap_or(Value::Null);
    serde_json::from_value(result)
        .map_err(|err| AdapterError::internal(format!("malformed remote object: {err}")))
}
