//! Request handling for the IPC server.

use serde_json::{Value, json};
use sharemic_core::{FilterSpec, Properties};
use sharemic_ipc::messages::{ErrorInfo, Method};
use sharemic_pipewire::{Patchbay, PwError, PwResult};
use tracing::{debug, info, warn};

/// What the request handler needs from the routing engine.
#[cfg_attr(test, mockall::automock)]
pub trait Router: Send + Sync {
    fn list(&self, props: Vec<String>) -> PwResult<Vec<Properties>>;
    fn link(&self, spec: FilterSpec) -> PwResult<()>;
    fn unlink(&self) -> PwResult<()>;
    fn has_pipewire(&self) -> bool;
}

impl Router for Patchbay {
    fn list(&self, props: Vec<String>) -> PwResult<Vec<Properties>> {
        Patchbay::list(self, props)
    }

    fn link(&self, spec: FilterSpec) -> PwResult<()> {
        Patchbay::link(self, spec)
    }

    fn unlink(&self) -> PwResult<()> {
        Patchbay::unlink(self)
    }

    fn has_pipewire(&self) -> bool {
        Patchbay::has_audio_server()
    }
}

/// Result of handling a request.
#[derive(Debug)]
pub struct HandleResult {
    /// The response to send back
    pub response: Result<Value, ErrorInfo>,
    /// The daemon should stop after answering
    pub shutdown: bool,
}

impl HandleResult {
    fn reply(response: Result<Value, ErrorInfo>) -> Self {
        Self { response, shutdown: false }
    }
}

fn error_info(error: &PwError) -> ErrorInfo {
    let code = match error {
        PwError::Core(sharemic_core::Error::InvalidSpec(_)) => ErrorInfo::INVALID_REQUEST,
        PwError::NotSupported(_) | PwError::Core(sharemic_core::Error::NotSupported(_)) => {
            ErrorInfo::NOT_SUPPORTED
        }
        PwError::EngineUnavailable(_) => ErrorInfo::UNAVAILABLE,
        _ => ErrorInfo::INTERNAL,
    };

    ErrorInfo::new(code, error.to_string())
}

fn done(result: PwResult<()>) -> Result<Value, ErrorInfo> {
    result.map(|()| json!({"success": true})).map_err(|e| {
        warn!(error = %e, "Request failed");
        error_info(&e)
    })
}

/// Handle an IPC request against the routing engine.
///
/// Blocks until the engine has answered, so callers on an async runtime
/// should run it on a blocking thread.
pub fn handle_request(method: &Method, router: &dyn Router) -> HandleResult {
    match method {
        Method::ListNodes { props } => {
            debug!(?props, "Listing nodes");
            HandleResult::reply(
                router
                    .list(props.clone())
                    .map(|nodes| json!(nodes))
                    .map_err(|e| error_info(&e)),
            )
        }

        Method::Link { spec } => {
            let spec = match FilterSpec::from_value(spec.clone()) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(error = %e, "Rejecting filter spec");
                    return HandleResult::reply(Err(ErrorInfo::new(
                        ErrorInfo::INVALID_REQUEST,
                        e.to_string(),
                    )));
                }
            };

            info!(mode = ?spec.mode(), "Link requested via IPC");
            HandleResult::reply(done(router.link(spec)))
        }

        Method::Unlink => {
            info!("Unlink requested via IPC");
            HandleResult::reply(done(router.unlink()))
        }

        Method::HasPipeWire => HandleResult::reply(Ok(json!(router.has_pipewire()))),

        Method::Shutdown => {
            info!("Shutdown requested via IPC");
            // The main loop will handle this
            HandleResult { response: Ok(json!({"success": true})), shutdown: true }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mockall::predicate::eq;

    fn include_spec() -> Value {
        json!({
            "include": [{"key": "application.name", "value": "Firefox"}],
            "exclude": [],
        })
    }

    #[test]
    fn test_list_forwards_props() {
        let mut router = MockRouter::new();
        router.expect_list().with(eq(vec!["node.name".to_string()])).times(1).returning(|_| {
            Ok(vec![[("node.name".to_string(), "firefox".to_string())].into_iter().collect()])
        });

        let result =
            handle_request(&Method::ListNodes { props: vec!["node.name".to_string()] }, &router);

        assert!(!result.shutdown);
        assert_eq!(result.response, Ok(json!([{"node.name": "firefox"}])));
    }

    #[test]
    fn test_link_parses_spec() {
        let mut router = MockRouter::new();
        router
            .expect_link()
            .withf(|spec: &FilterSpec| spec.include.len() == 1 && spec.exclude.is_empty())
            .times(1)
            .returning(|_| Ok(()));

        let result = handle_request(&Method::Link { spec: include_spec() }, &router);

        assert_matches!(result.response, Ok(_));
    }

    #[test]
    fn test_invalid_spec_never_reaches_engine() {
        let mut router = MockRouter::new();
        router.expect_link().never();

        let result = handle_request(&Method::Link { spec: json!({"include": []}) }, &router);

        assert_matches!(result.response, Err(ErrorInfo { code: 400, .. }));
    }

    #[test]
    fn test_not_supported_maps_to_501() {
        let mut router = MockRouter::new();
        router
            .expect_link()
            .returning(|_| Err(PwError::NotSupported("The active sound server is not PipeWire".into())));

        let result = handle_request(&Method::Link { spec: include_spec() }, &router);

        assert_matches!(result.response, Err(ErrorInfo { code: 501, .. }));
    }

    #[test]
    fn test_engine_gone_maps_to_503() {
        let mut router = MockRouter::new();
        router.expect_unlink().returning(|| Err(PwError::EngineUnavailable("gone".into())));

        let result = handle_request(&Method::Unlink, &router);

        assert_matches!(result.response, Err(ErrorInfo { code: 503, .. }));
    }

    #[test]
    fn test_sink_failure_maps_to_500() {
        let mut router = MockRouter::new();
        router.expect_link().returning(|_| Err(PwError::NodeCreationFailed("no ports".into())));

        let result = handle_request(&Method::Link { spec: include_spec() }, &router);

        assert_matches!(result.response, Err(ErrorInfo { code: 500, .. }));
    }

    #[test]
    fn test_has_pipewire() {
        let mut router = MockRouter::new();
        router.expect_has_pipewire().return_const(true);

        let result = handle_request(&Method::HasPipeWire, &router);

        assert_eq!(result.response, Ok(json!(true)));
    }

    #[test]
    fn test_shutdown_leaves_engine_alone() {
        let router = MockRouter::new();

        let result = handle_request(&Method::Shutdown, &router);

        assert!(result.shutdown);
        assert_matches!(result.response, Ok(_));
    }
}
