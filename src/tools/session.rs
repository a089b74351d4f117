//! Session tools: create, list, destroy
//!
//! Sessions are caller-named handles to persistent engine-side execution
//! contexts. The registry here is bookkeeping; the engine owns the actual
//! resources and may expire them on its own 30-minute inactivity TTL, so a
//! listed session can already be gone engine-side. That is tolerated
//! everywhere: teardown failures are logged, never propagated.

use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::engine::{CacheMode, HookOverrides, ScopedHooks, SessionCookie};
use crate::profiles::{build_effective_config, CallOverrides};
use crate::report::format_crawl_error;
use crate::tools::AppContext;

#[derive(Debug, Deserialize)]
pub struct CreateSessionParams {
    /// Session name; a UUID is generated when absent.
    pub session_id: Option<String>,
    /// Optional URL to visit during creation (e.g. a login page).
    pub url: Option<String>,
    pub cookies: Option<Vec<SessionCookie>>,
    pub headers: Option<HashMap<String, String>>,
}

/// Creates a named session for multi-step workflows.
///
/// Creating an id that already exists reports existence and changes nothing.
/// When an initial URL is given, its crawl failure does not prevent session
/// creation; the response carries a warning instead.
pub async fn create_session(ctx: &AppContext, params: CreateSessionParams) -> String {
    let session_id = params
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if ctx.sessions.lock().unwrap().contains(&session_id) {
        return format!("Session already exists: {session_id}");
    }

    tracing::info!("create_session: {} (url={:?})", session_id, params.url);

    let overrides = CallOverrides {
        session_id: Some(session_id.clone()),
        cache_mode: Some(CacheMode::Bypass),
        ..Default::default()
    };
    let config = build_effective_config(&ctx.profiles, None, overrides);

    if let Some(url) = params.url {
        let outcome = {
            let _hooks = ScopedHooks::install(
                ctx.engine.as_ref(),
                HookOverrides {
                    headers: params.headers,
                    cookies: params.cookies,
                },
            );
            ctx.engine.fetch(&url, &config).await
        };

        ctx.sessions.lock().unwrap().register(&session_id);

        if !outcome.success {
            return format!(
                "Session created: {session_id}\n\nWarning: initial crawl failed:\n{}",
                format_crawl_error(&url, &outcome)
            );
        }
        return format!(
            "Session created: {session_id}\n\nInitial page content:\n{}",
            outcome.best_content().unwrap_or_default()
        );
    }

    if params.cookies.is_some() {
        // Seed the session's cookies with a no-op navigation; the result is
        // irrelevant, only the hook injection matters.
        let _hooks = ScopedHooks::install(
            ctx.engine.as_ref(),
            HookOverrides {
                headers: None,
                cookies: params.cookies,
            },
        );
        let _ = ctx.engine.fetch("about:blank", &config).await;
    }

    ctx.sessions.lock().unwrap().register(&session_id);
    format!("Session created: {session_id}")
}

/// Lists active sessions with their ages.
pub async fn list_sessions(ctx: &AppContext) -> String {
    let entries = ctx.sessions.lock().unwrap().entries();
    if entries.is_empty() {
        return "No active sessions.".to_string();
    }

    let mut lines = vec!["Active sessions:".to_string()];
    for entry in entries {
        lines.push(format!(
            "  - {} (created {} min ago)",
            entry.id, entry.age_minutes
        ));
    }
    lines.push(String::new());
    lines.push(
        "Sessions expire after 30 minutes of inactivity; an expired session is \
         recreated transparently on next use."
            .to_string(),
    );
    lines.join("\n")
}

#[derive(Debug, Deserialize)]
pub struct DestroySessionParams {
    pub session_id: String,
}

/// Destroys a named session.
///
/// The registry entry is removed unconditionally: engine-side teardown may
/// fail (the engine could have expired the session already) and that failure
/// is logged, never allowed to keep a dead id in the registry.
pub async fn destroy_session(ctx: &AppContext, params: DestroySessionParams) -> String {
    let session_id = params.session_id;

    if !ctx.sessions.lock().unwrap().contains(&session_id) {
        return format!("Session not found: {session_id}");
    }

    tracing::info!("destroy_session: {}", session_id);
    if let Err(e) = ctx.engine.kill_session(&session_id).await {
        tracing::warn!("Error killing session {}: {}", session_id, e);
    }
    ctx.sessions.lock().unwrap().remove(&session_id);
    format!("Session destroyed: {session_id}")
}
