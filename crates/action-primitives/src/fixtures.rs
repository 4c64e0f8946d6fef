//! Scripted page used by the primitive tests.

use std::sync::Arc;

use cdp_adapter::testing::{responder, Responder, TestBrowser};
use cdp_adapter::{AdapterError, CommandTarget, Page};
use serde_json::{json, Value};

use crate::scripts;

/// Box quad of the single element every CSS query matches.
pub(crate) const BUTTON_QUAD: [f64; 8] = [10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0];

/// One-element DOM. `quad: None` makes the element layout-less.
pub(crate) fn one_element(quad: Option<[f64; 8]>, editable: bool) -> Responder {
    responder(move |_: &CommandTarget, method: &str, params: &Value| match method {
        "Runtime.callFunctionOn" => {
            let decl = params["functionDeclaration"].as_str().unwrap_or_default();
            let value = if decl.contains("function (kind, query, pierce)") {
                return Some(Ok(json!({
                    "result": { "type": "object", "subtype": "array", "objectId": "arr:1" }
                })));
            } else if decl.contains("function (index)") {
                return Some(Ok(json!({
                    "result": { "type": "object", "subtype": "node", "objectId": "el:0" }
                })));
            } else if decl.contains("this.length") {
                json!(1)
            } else if decl == scripts::FOCUS_FOR_INPUT {
                json!({ "editable": editable, "kind": if editable { "input" } else { "div" } })
            } else if decl == scripts::ASSIGN_VALUE || decl == scripts::FOCUS {
                json!(true)
            } else if decl.contains("segments.unshift") {
                json!("/html[1]/body[1]/div[1]")
            } else {
                Value::Null
            };
            Some(Ok(json!({ "result": { "type": "object", "value": value } })))
        }
        "Runtime.getProperties" => Some(Ok(json!({
            "result": [{ "name": "0", "value": { "type": "object", "subtype": "node", "objectId": "el:0" } }]
        }))),
        "Page.captureScreenshot" => Some(Ok(json!({ "data": "iVBORw0KGgo=" }))),
        "DOM.getBoxModel" => Some(match quad {
            Some(quad) => Ok(json!({ "model": { "content": quad } })),
            None => Err(AdapterError::protocol(-32000, "Could not compute box model.")),
        }),
        "Runtime.evaluate" => {
            let expression = params["expression"].as_str().unwrap_or_default();
            let value = if expression == scripts::SCROLL_POSITION {
                json!({ "x": 0, "y": 300 })
            } else if expression == scripts::VIEWPORT_CENTER {
                json!({ "x": 400, "y": 300 })
            } else {
                Value::Null
            };
            Some(Ok(json!({ "result": { "type": "object", "value": value } })))
        }
        _ => None,
    })
}

pub(crate) async fn page(responder: Responder) -> (TestBrowser, Arc<Page>) {
    let browser = TestBrowser::start(responder).await;
    let page = browser.open_page("P1", "S1").await;
    browser.transport.clear();
    (browser, page)
}

/// `type` field of every input event sent with `method`.
pub(crate) fn event_types(browser: &TestBrowser, method: &str) -> Vec<String> {
    browser
        .transport
        .sent(method)
        .iter()
        .filter_map(|params| params["type"].as_str().map(str::to_string))
        .collect()
}
