//! Method + path table for the dispatching proxy.
//!
//! A pattern is either an exact path or a path with one `{name}` placeholder
//! that matches any text, slashes included. Every route is also reachable
//! behind an API version prefix such as `/v1.12`.

use axum::http::Method;

/// How a matched request picks its backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Backend named by the `host` query parameter
    ExplicitHost,
    /// `host` query parameter, else a random runtime host
    HostOrRandom,
    /// Served from the registry unless `host` is given
    ListImages,
    ListContainers,
    /// Runtime host owning the image named in the path
    ByImage,
    /// Runtime host owning the container named in the path
    ByContainer,
    /// Host owning the `container` parameter (query or form body), else `host`
    Commit,
    CreateContainer,
    ListControllers,
    ListRuntimeHosts,
    ListAgents,
    CreateServer,
    DeleteServer,
    /// `/server/{name}/start|stop`, sent to the owner as a container action
    ServerAction(&'static str),
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Exact(&'static str),
    Named {
        prefix: &'static str,
        suffix: &'static str,
    },
}

impl Pattern {
    fn parse(pattern: &'static str) -> Self {
        match pattern.split_once("{name}") {
            Some((prefix, suffix)) => Pattern::Named { prefix, suffix },
            None => Pattern::Exact(pattern),
        }
    }

    fn matches<'a>(&self, path: &'a str) -> Option<Option<&'a str>> {
        match *self {
            Pattern::Exact(exact) => (path == exact).then_some(None),
            Pattern::Named { prefix, suffix } => {
                let rest = path.strip_prefix(prefix)?;
                let name = rest.strip_suffix(suffix)?;
                Some(Some(name))
            },
        }
    }
}

#[derive(Debug, Clone)]
struct RouteEntry {
    method: Method,
    pattern: Pattern,
    dispatch: Dispatch,
}

/// Result of resolving a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub dispatch: Dispatch,
    /// Value captured by `{name}`, if the pattern has one
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Exact patterns always win over named ones;
    /// among named patterns, the first registered match wins.
    pub fn route(mut self, method: Method, pattern: &'static str, dispatch: Dispatch) -> Self {
        self.entries.push(RouteEntry {
            method,
            pattern: Pattern::parse(pattern),
            dispatch,
        });
        self
    }

    /// The controller's full API surface
    pub fn standard() -> Self {
        use Dispatch::*;
        let get = Method::GET;
        let post = Method::POST;
        let delete = Method::DELETE;

        Self::new()
            .route(get.clone(), "/events", ExplicitHost)
            .route(get.clone(), "/info", HostOrRandom)
            .route(get.clone(), "/version", HostOrRandom)
            .route(get.clone(), "/images/json", ListImages)
            .route(get.clone(), "/images/search", ExplicitHost)
            .route(get.clone(), "/images/{name}/get", ByImage)
            .route(get.clone(), "/images/{name}/history", ByImage)
            .route(get.clone(), "/images/{name}/json", ByImage)
            .route(get.clone(), "/containers/ps", ListContainers)
            .route(get.clone(), "/containers/json", ListContainers)
            .route(get.clone(), "/containers/{name}/attach/ws", ByContainer)
            .route(get.clone(), "/containers/{name}/export", ByContainer)
            .route(get.clone(), "/containers/{name}/changes", ByContainer)
            .route(get.clone(), "/containers/{name}/json", ByContainer)
            .route(get.clone(), "/containers/{name}/top", ByContainer)
            .route(get.clone(), "/controllers/json", ListControllers)
            .route(get.clone(), "/dockers/json", ListRuntimeHosts)
            .route(get, "/agents/json", ListAgents)
            .route(post.clone(), "/auth", ExplicitHost)
            .route(post.clone(), "/commit", Commit)
            .route(post.clone(), "/build", ExplicitHost)
            .route(post.clone(), "/images/create", HostOrRandom)
            .route(post.clone(), "/images/load", ExplicitHost)
            .route(post.clone(), "/images/{name}/insert", ByImage)
            .route(post.clone(), "/images/{name}/push", ByImage)
            .route(post.clone(), "/images/{name}/tag", ByImage)
            .route(post.clone(), "/containers/create", CreateContainer)
            .route(post.clone(), "/containers/{name}/kill", ByContainer)
            .route(post.clone(), "/containers/{name}/restart", ByContainer)
            .route(post.clone(), "/containers/{name}/start", ByContainer)
            .route(post.clone(), "/containers/{name}/stop", ByContainer)
            .route(post.clone(), "/containers/{name}/wait", ByContainer)
            .route(post.clone(), "/containers/{name}/resize", ByContainer)
            .route(post.clone(), "/containers/{name}/attach", ByContainer)
            .route(post.clone(), "/containers/{name}/copy", ByContainer)
            .route(post.clone(), "/server", CreateServer)
            .route(post.clone(), "/server/{name}/start", ServerAction("start"))
            .route(post, "/server/{name}/stop", ServerAction("stop"))
            .route(delete.clone(), "/containers/{name}", ByContainer)
            .route(delete.clone(), "/images/{name}", ByImage)
            .route(delete, "/server", DeleteServer)
    }

    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.resolve_unversioned(method, path).or_else(|| {
            strip_version_prefix(path).and_then(|rest| self.resolve_unversioned(method, rest))
        })
    }

    fn resolve_unversioned(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let candidates = move || self.entries.iter().filter(move |entry| entry.method == *method);

        let exact = candidates().find(|entry| {
            matches!(entry.pattern, Pattern::Exact(_)) && entry.pattern.matches(path).is_some()
        });
        let entry_and_name = match exact {
            Some(entry) => Some((entry, None)),
            None => candidates().find_map(|entry| {
                entry
                    .pattern
                    .matches(path)
                    .map(|name| (entry, name.map(str::to_string)))
            }),
        }?;

        let (entry, name) = entry_and_name;
        Some(RouteMatch {
            dispatch: entry.dispatch,
            name,
        })
    }
}

/// Remove a leading `/v<digits and dots>` segment
pub fn strip_version_prefix(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/v")?;
    let version_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    if version_len == 0 {
        return None;
    }
    let remainder = &rest[version_len..];
    remainder.starts_with('/').then_some(remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(method: Method, path: &str) -> Option<RouteMatch> {
        RouteTable::standard().resolve(&method, path)
    }

    #[test]
    fn test_exact_routes() {
        let route = resolve(Method::GET, "/containers/json").unwrap();
        assert_eq!(route.dispatch, Dispatch::ListContainers);
        assert_eq!(route.name, None);

        assert_eq!(
            resolve(Method::GET, "/images/json").unwrap().dispatch,
            Dispatch::ListImages
        );
        assert_eq!(
            resolve(Method::POST, "/containers/create").unwrap().dispatch,
            Dispatch::CreateContainer
        );
    }

    #[test]
    fn test_named_capture_may_contain_slashes() {
        let route = resolve(Method::GET, "/images/registry.local/busybox/json").unwrap();
        assert_eq!(route.dispatch, Dispatch::ByImage);
        assert_eq!(route.name.as_deref(), Some("registry.local/busybox"));

        let route = resolve(Method::DELETE, "/containers/xyz").unwrap();
        assert_eq!(route.dispatch, Dispatch::ByContainer);
        assert_eq!(route.name.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_attach_websocket_route() {
        let route = resolve(Method::GET, "/containers/abc/attach/ws").unwrap();
        assert_eq!(route.dispatch, Dispatch::ByContainer);
        assert_eq!(route.name.as_deref(), Some("abc"));
    }

    #[test]
    fn test_server_routes() {
        assert_eq!(
            resolve(Method::POST, "/server").unwrap().dispatch,
            Dispatch::CreateServer
        );
        let route = resolve(Method::POST, "/server/vm1/stop").unwrap();
        assert_eq!(route.dispatch, Dispatch::ServerAction("stop"));
        assert_eq!(route.name.as_deref(), Some("vm1"));
        assert_eq!(
            resolve(Method::DELETE, "/server").unwrap().dispatch,
            Dispatch::DeleteServer
        );
    }

    #[test]
    fn test_version_prefix_alias() {
        let plain = resolve(Method::GET, "/containers/abc/json").unwrap();
        let versioned = resolve(Method::GET, "/v1.12/containers/abc/json").unwrap();
        assert_eq!(plain, versioned);

        assert_eq!(
            resolve(Method::GET, "/v2/version").unwrap().dispatch,
            Dispatch::HostOrRandom
        );
        assert!(resolve(Method::GET, "/vx/version").is_none());
    }

    #[test]
    fn test_method_must_match() {
        assert!(resolve(Method::PUT, "/containers/json").is_none());
        assert!(resolve(Method::GET, "/server").is_none());
        assert!(resolve(Method::GET, "/nothing/here").is_none());
    }

    #[test]
    fn test_strip_version_prefix() {
        assert_eq!(strip_version_prefix("/v1.12/info"), Some("/info"));
        assert_eq!(strip_version_prefix("/v1/info"), Some("/info"));
        assert_eq!(strip_version_prefix("/version"), None);
        assert_eq!(strip_version_prefix("/v1.12"), None);
        assert_eq!(strip_version_prefix("/info"), None);
    }
}
