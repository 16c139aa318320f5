//! Translates CDP events into [`PageEvent`]s.
//!
//! Network events are forwarded from a single task so a request's start,
//! response and completion keep their relative order.

use super::{LoadStatus, PageEvent, RequestInfo, ResponseInfo, ResponseStage};
use crate::{CaptureError, Result};
use chromiumoxide::{
    Page,
    cdp::browser_protocol::network::{
        EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
        EventRequestWillBeSent, EventResponseReceived,
    },
    cdp::browser_protocol::page::{
        EventJavascriptDialogOpening, EventLoadEventFired, HandleJavaScriptDialogParams,
    },
    cdp::js_protocol::runtime::{
        ConsoleApiCalledType, EnableParams as RuntimeEnableParams, EventConsoleApiCalled,
        EventExceptionThrown,
    },
};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone)]
struct InFlight {
    url: String,
    method: String,
    status: Option<u16>,
}

pub async fn attach(page: &Page, tx: UnboundedSender<PageEvent>) -> Result<()> {
    page.execute(NetworkEnableParams::default())
        .await
        .map_err(|e| CaptureError::Connection(format!("Failed to enable Network domain: {}", e)))?;
    page.execute(RuntimeEnableParams::default())
        .await
        .map_err(|e| CaptureError::Connection(format!("Failed to enable Runtime domain: {}", e)))?;

    attach_network(page, tx.clone()).await?;
    attach_lifecycle(page, tx.clone()).await?;
    attach_diagnostics(page, tx).await?;
    attach_dialogs(page).await?;
    Ok(())
}

fn listener_error(kind: &str, e: impl std::fmt::Display) -> CaptureError {
    CaptureError::Connection(format!("Failed to attach {} listener: {}", kind, e))
}

async fn attach_network(page: &Page, tx: UnboundedSender<PageEvent>) -> Result<()> {
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| listener_error("request", e))?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| listener_error("response", e))?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(|e| listener_error("loading finished", e))?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(|e| listener_error("loading failed", e))?;

    tokio::spawn(async move {
        let mut in_flight: HashMap<String, InFlight> = HashMap::new();

        loop {
            let sent = tokio::select! {
                biased;
                Some(event) = requests.next() => {
                    let id = event.request_id.inner().to_string();

                    // A redirect reuses the request id; close out the previous hop first.
                    if let Some(redirect) = &event.redirect_response
                        && let Some(previous) = in_flight.remove(&id)
                    {
                        let _ = tx.send(PageEvent::ResponseReceived(ResponseInfo {
                            url: previous.url,
                            method: Some(previous.method),
                            status: u16::try_from(redirect.status).ok(),
                            stage: ResponseStage::End,
                        }));
                    }

                    let request = RequestInfo {
                        url: event.request.url.clone(),
                        method: event.request.method.clone(),
                    };
                    in_flight.insert(
                        id,
                        InFlight {
                            url: request.url.clone(),
                            method: request.method.clone(),
                            status: None,
                        },
                    );
                    tx.send(PageEvent::RequestStarted(request))
                }
                Some(event) = responses.next() => {
                    let id = event.request_id.inner().to_string();
                    let status = u16::try_from(event.response.status).ok();
                    let method = in_flight.get_mut(&id).map(|entry| {
                        entry.status = status;
                        entry.method.clone()
                    });
                    tx.send(PageEvent::ResponseReceived(ResponseInfo {
                        url: event.response.url.clone(),
                        method,
                        status,
                        stage: ResponseStage::Start,
                    }))
                }
                Some(event) = finished.next() => {
                    match in_flight.remove(event.request_id.inner()) {
                        Some(entry) => tx.send(PageEvent::ResponseReceived(ResponseInfo {
                            url: entry.url,
                            method: Some(entry.method),
                            status: entry.status,
                            stage: ResponseStage::End,
                        })),
                        None => Ok(()),
                    }
                }
                Some(event) = failed.next() => {
                    match in_flight.remove(event.request_id.inner()) {
                        Some(entry) => {
                            tracing::debug!("Request failed ({}): {}", event.error_text, entry.url);
                            tx.send(PageEvent::ResponseReceived(ResponseInfo {
                                url: entry.url,
                                method: Some(entry.method),
                                status: entry.status,
                                stage: ResponseStage::End,
                            }))
                        }
                        None => Ok(()),
                    }
                }
                else => break,
            };

            if sent.is_err() {
                break;
            }
        }
    });

    Ok(())
}

async fn attach_lifecycle(page: &Page, tx: UnboundedSender<PageEvent>) -> Result<()> {
    let mut loads = page
        .event_listener::<EventLoadEventFired>()
        .await
        .map_err(|e| listener_error("load", e))?;

    tokio::spawn(async move {
        while loads.next().await.is_some() {
            if tx.send(PageEvent::LoadFinished(LoadStatus::Success)).is_err() {
                break;
            }
        }
    });

    Ok(())
}

async fn attach_diagnostics(page: &Page, tx: UnboundedSender<PageEvent>) -> Result<()> {
    let mut exceptions = page
        .event_listener::<EventExceptionThrown>()
        .await
        .map_err(|e| listener_error("pageerror", e))?;
    let mut console = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(|e| listener_error("console", e))?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(event) = exceptions.next() => {
                    let details = &event.exception_details;
                    let message = details
                        .exception
                        .as_ref()
                        .and_then(|e| e.description.clone())
                        .unwrap_or_else(|| details.text.clone());
                    PageEvent::PageError(message)
                }
                Some(event) = console.next() => {
                    let level = match event.r#type {
                        ConsoleApiCalledType::Debug => "debug",
                        ConsoleApiCalledType::Info => "info",
                        ConsoleApiCalledType::Warning => "warning",
                        ConsoleApiCalledType::Error => "error",
                        _ => "log",
                    };
                    let text = event
                        .args
                        .iter()
                        .filter_map(|arg| arg.value.as_ref())
                        .map(|v| match v.as_str() {
                            Some(s) => s.to_string(),
                            None => v.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(" ");
                    PageEvent::Console {
                        level: level.to_string(),
                        text,
                    }
                }
                else => break,
            };

            if tx.send(event).is_err() {
                break;
            }
        }
    });

    Ok(())
}

/// Alerts, confirms and prompts would stall the page; dismiss them all.
async fn attach_dialogs(page: &Page) -> Result<()> {
    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(|e| listener_error("dialog", e))?;
    let page = page.clone();

    tokio::spawn(async move {
        while let Some(event) = dialogs.next().await {
            tracing::debug!("Dismissing {:?} dialog: {}", event.r#type, event.message);
            if let Ok(params) = HandleJavaScriptDialogParams::builder().accept(false).build()
                && let Err(e) = page.execute(params).await
            {
                tracing::debug!("Failed to dismiss dialog: {}", e);
            }
        }
    });

    Ok(())
}
