use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use super::routes::{Location, RouteTable, HOME_ROUTE, LOGIN_ROUTE};
use super::RouteError;
use crate::auth::SessionManager;
use crate::events::{AppEvent, EventBus, NoticeLevel};

/// Redirects followed by one `navigate` call before giving up
const MAX_REDIRECT_HOPS: usize = 5;

/// Where signed-in users land when no destination was remembered
pub const DEFAULT_LANDING: &str = "/dashboard";

const LOGIN_NOTICE: &str = "Please log in to access this page";
const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Please log in again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    Redirect(Location),
}

/// A completed navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub location: Location,
    pub route: String,
    pub params: BTreeMap<String, String>,
    /// Original target when the guard or an alias sent us elsewhere
    pub redirected_from: Option<String>,
}

pub struct NavigationGuard {
    session: Arc<SessionManager>,
    routes: RouteTable,
    events: EventBus,
}

impl NavigationGuard {
    pub fn new(session: Arc<SessionManager>, routes: RouteTable, events: EventBus) -> Self {
        Self {
            session,
            routes,
            events,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Evaluate the guard predicates for one target, in order:
    /// protected route while signed out, then guest-only route while signed in.
    pub fn check(&self, target: &str) -> Result<GuardDecision, RouteError> {
        let location = Location::parse(target)?;
        self.check_location(&location)
    }

    fn check_location(&self, location: &Location) -> Result<GuardDecision, RouteError> {
        let resolved = self.routes.resolve(location)?;
        let meta = &resolved.route.meta;
        let authenticated = self.session.is_authenticated();
        let full_path = resolved.location.full_path();

        debug!(
            to = %full_path,
            route = %resolved.route.name,
            authenticated = authenticated,
            "Navigation"
        );

        if meta.requires_auth && !authenticated {
            self.session.remember_redirect(&full_path);
            self.events.publish(AppEvent::notice(NoticeLevel::Info, LOGIN_NOTICE));
            let login = self.path_of(LOGIN_ROUTE, "/login");
            return Ok(GuardDecision::Redirect(
                Location::new(&login).with_query("redirect", &full_path),
            ));
        }

        if meta.guest_only && authenticated {
            return Ok(GuardDecision::Redirect(Location::new(&self.path_of(HOME_ROUTE, "/"))));
        }

        if resolved.location.query_value("session") == Some("expired") {
            self.events
                .publish(AppEvent::notice(NoticeLevel::Warning, SESSION_EXPIRED_NOTICE));
        }

        Ok(GuardDecision::Proceed)
    }

    /// Check `target`, follow any redirects, and publish the page metadata of
    /// the route finally reached.
    pub fn navigate(&self, target: &str) -> Result<Transition, RouteError> {
        let original = Location::parse(target)?;
        let mut location = original.clone();
        let mut redirected = false;
        let mut visited = HashSet::new();

        for _ in 0..=MAX_REDIRECT_HOPS {
            if !visited.insert(location.full_path()) {
                break;
            }

            match self.check_location(&location)? {
                GuardDecision::Redirect(next) => {
                    debug!(from = %location, to = %next, "Guard redirected");
                    location = next;
                    redirected = true;
                }
                GuardDecision::Proceed => {
                    let resolved = self.routes.resolve(&location)?;
                    let meta = &resolved.route.meta;
                    self.events.publish(AppEvent::PageMeta {
                        title: meta.title.clone(),
                        description: meta.description.clone(),
                    });

                    let redirected_from = (redirected || resolved.aliased_from.is_some())
                        .then(|| original.full_path());
                    info!(to = %resolved.location, route = %resolved.route.name, "Navigated");
                    return Ok(Transition {
                        location: resolved.location.clone(),
                        route: resolved.route.name.clone(),
                        params: resolved.params.clone(),
                        redirected_from,
                    });
                }
            }
        }

        Err(RouteError::RedirectLoop(original.full_path()))
    }

    /// Where to go after a successful login: the remembered destination, or
    /// the dashboard. The remembered slot is consumed.
    pub fn take_post_login_destination(&self) -> String {
        self.session
            .take_redirect()
            .unwrap_or_else(|| DEFAULT_LANDING.to_string())
    }

    fn path_of(&self, name: &str, fallback: &str) -> String {
        self.routes
            .by_name(name)
            .map(|r| r.path.clone())
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiRequest, ApiResponse, Transport, TransportError};
    use crate::auth::token::tests::token_expiring_in;
    use crate::auth::SessionStorage;
    use crate::router::{RouteDef, RouteMeta};
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            Err(TransportError::NoResponse("offline".to_string()))
        }
    }

    fn guard() -> (NavigationGuard, Arc<SessionManager>, EventBus) {
        let session = Arc::new(SessionManager::new(SessionStorage::in_memory(), Arc::new(Offline)));
        let events = EventBus::new(16);
        let guard = NavigationGuard::new(session.clone(), RouteTable::default(), events.clone());
        (guard, session, events)
    }

    #[test]
    fn test_protected_route_redirects_to_login() {
        let (guard, session, events) = guard();
        let mut rx = events.subscribe();

        let decision = guard.check("/bookings?page=2").expect("check");

        let expected = Location::new("/login").with_query("redirect", "/bookings?page=2");
        assert_eq!(decision, GuardDecision::Redirect(expected));
        assert_eq!(
            rx.try_recv().ok(),
            Some(AppEvent::notice(NoticeLevel::Info, LOGIN_NOTICE))
        );
        assert_eq!(session.take_redirect().as_deref(), Some("/bookings?page=2"));
    }

    #[test]
    fn test_guest_only_redirects_home_when_signed_in() {
        let (guard, session, _) = guard();
        session.set_token(&token_expiring_in(3600), true).expect("token");

        assert_eq!(
            guard.check("/login").expect("check"),
            GuardDecision::Redirect(Location::new("/"))
        );
        assert_eq!(guard.check("/profile").expect("check"), GuardDecision::Proceed);
    }

    #[test]
    fn test_expired_token_counts_as_signed_out() {
        let (guard, session, _) = guard();
        session.set_token(&token_expiring_in(-60), true).expect("token");

        assert!(matches!(guard.check("/dashboard").expect("check"), GuardDecision::Redirect(_)));
        assert_eq!(guard.check("/register").expect("check"), GuardDecision::Proceed);
    }

    #[test]
    fn test_public_route_proceeds() {
        let (guard, _, _) = guard();
        assert_eq!(guard.check("/spin").expect("check"), GuardDecision::Proceed);
        assert_eq!(guard.check("/no/such/page").expect("check"), GuardDecision::Proceed);
    }

    #[test]
    fn test_session_expired_query_posts_warning() {
        let (guard, _, events) = guard();
        let mut rx = events.subscribe();

        guard.check("/login?session=expired").expect("check");

        assert_eq!(
            rx.try_recv().ok(),
            Some(AppEvent::notice(NoticeLevel::Warning, SESSION_EXPIRED_NOTICE))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_navigate_follows_redirect_and_publishes_meta() {
        let (guard, _, events) = guard();
        let mut rx = events.subscribe();

        let transition = guard.navigate("/booking/42").expect("navigate");

        assert_eq!(transition.route, "login");
        assert_eq!(transition.location.query_value("redirect"), Some("/booking/42"));
        assert_eq!(transition.redirected_from.as_deref(), Some("/booking/42"));

        let mut titles = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::PageMeta { title, .. } = event {
                titles.push(title);
            }
        }
        assert_eq!(titles, vec!["Login - So Where To?".to_string()]);
    }

    #[test]
    fn test_navigate_through_alias_when_signed_in() {
        let (guard, session, _) = guard();
        session.set_token(&token_expiring_in(3600), false).expect("token");

        let transition = guard.navigate("/my-account").expect("navigate");

        assert_eq!(transition.route, "profile");
        assert_eq!(transition.location.path, "/profile");
        assert_eq!(transition.redirected_from.as_deref(), Some("/my-account"));
    }

    #[test]
    fn test_navigate_captures_params() {
        let (guard, session, _) = guard();
        session.set_token(&token_expiring_in(3600), true).expect("token");

        let transition = guard.navigate("/booking/abc-123").expect("navigate");
        assert_eq!(transition.route, "booking-details");
        assert_eq!(transition.params["id"], "abc-123");
        assert_eq!(transition.redirected_from, None);
    }

    #[test]
    fn test_navigate_rejects_loop() {
        let session = Arc::new(SessionManager::new(SessionStorage::in_memory(), Arc::new(Offline)));
        // a login page that itself requires auth can never be reached
        let routes = RouteTable::new(RouteDef::new("not-found", "/:pathMatch", RouteMeta::public("404", "")))
            .route(RouteDef::new(LOGIN_ROUTE, "/login", RouteMeta::protected("Login", "")));
        let guard = NavigationGuard::new(session, routes, EventBus::new(16));

        let err = guard.navigate("/login").expect_err("loop");
        assert!(matches!(err, RouteError::RedirectLoop(_)));
    }

    #[test]
    fn test_post_login_destination() {
        let (guard, _, _) = guard();
        assert_eq!(guard.take_post_login_destination(), DEFAULT_LANDING);

        guard.check("/wishlist").expect("check");
        assert_eq!(guard.take_post_login_destination(), "/wishlist");
        assert_eq!(guard.take_post_login_destination(), DEFAULT_LANDING);
    }
}
