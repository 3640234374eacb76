use std::collections::{BTreeMap, HashSet};
use std::fmt;

use url::{form_urlencoded, Url};

use super::RouteError;

/// Base used only to let `url` parse app-relative targets
const PARSE_BASE: &str = "http://app.invalid/";

/// Alias chains longer than this are treated as a loop
const MAX_ALIAS_DEPTH: usize = 8;

pub const HOME_ROUTE: &str = "home";
pub const LOGIN_ROUTE: &str = "login";
pub const NOT_FOUND_ROUTE: &str = "not-found";

/// Page chrome a route renders in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Default,
    Auth,
    Checkout,
}

impl Layout {
    pub fn name(&self) -> &'static str {
        match self {
            Layout::Default => "default",
            Layout::Auth => "auth",
            Layout::Checkout => "checkout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMeta {
    pub title: String,
    pub description: Option<String>,
    pub requires_auth: bool,
    pub guest_only: bool,
    pub layout: Layout,
}

impl RouteMeta {
    pub fn public(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: Some(description.to_string()),
            requires_auth: false,
            guest_only: false,
            layout: Layout::Default,
        }
    }

    pub fn protected(title: &str, description: &str) -> Self {
        Self {
            requires_auth: true,
            ..Self::public(title, description)
        }
    }

    pub fn guest_only(title: &str, description: &str) -> Self {
        Self {
            guest_only: true,
            layout: Layout::Auth,
            ..Self::public(title, description)
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }
}

/// A named route. Path segments starting with `:` capture a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub name: String,
    pub path: String,
    pub meta: RouteMeta,
}

impl RouteDef {
    pub fn new(name: &str, path: &str, meta: RouteMeta) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            meta,
        }
    }

    /// Captured parameters if `path` matches this route's pattern
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let pattern: Vec<&str> = segments(&self.path).collect();
        let actual: Vec<&str> = segments(path).collect();
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (expected, value) in pattern.iter().zip(actual.iter()) {
            if let Some(name) = expected.strip_prefix(':') {
                params.insert(name.to_string(), value.to_string());
            } else if expected != value {
                return None;
            }
        }
        Some(params)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// An app-relative navigation target: path, query and fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub hash: Option<String>,
}

impl Location {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            query: Vec::new(),
            hash: None,
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Parse "/path?query#hash". Absolute URLs are rejected so navigation
    /// can never leave the application.
    pub fn parse(target: &str) -> Result<Self, RouteError> {
        if !target.starts_with('/') || target.starts_with("//") {
            return Err(RouteError::InvalidTarget(target.to_string()));
        }
        let base = Url::parse(PARSE_BASE).map_err(|e| RouteError::InvalidTarget(e.to_string()))?;
        let url = base
            .join(target)
            .map_err(|_| RouteError::InvalidTarget(target.to_string()))?;

        Ok(Self {
            path: url.path().to_string(),
            query: url.query_pairs().into_owned().collect(),
            hash: url.fragment().map(str::to_string),
        })
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Path plus encoded query and fragment
    pub fn full_path(&self) -> String {
        let mut full = self.path.clone();
        if !self.query.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            full.push('?');
            full.push_str(&query);
        }
        if let Some(ref hash) = self.hash {
            full.push('#');
            full.push_str(hash);
        }
        full
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_path())
    }
}

/// Result of matching a location against the table
#[derive(Debug, Clone)]
pub struct ResolvedRoute<'a> {
    pub route: &'a RouteDef,
    /// Location after following aliases
    pub location: Location,
    pub params: BTreeMap<String, String>,
    pub aliased_from: Option<String>,
}

/// Ordered route definitions plus path aliases and a catch-all.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<RouteDef>,
    aliases: Vec<(String, String)>,
    not_found: RouteDef,
}

impl RouteTable {
    /// Empty table with only the catch-all route
    pub fn new(not_found: RouteDef) -> Self {
        Self {
            routes: Vec::new(),
            aliases: Vec::new(),
            not_found,
        }
    }

    pub fn route(mut self, route: RouteDef) -> Self {
        self.routes.push(route);
        self
    }

    /// Requests for `from` are served by `to`, keeping the query
    pub fn alias(mut self, from: &str, to: &str) -> Self {
        self.aliases.push((from.to_string(), to.to_string()));
        self
    }

    pub fn by_name(&self, name: &str) -> Option<&RouteDef> {
        self.routes
            .iter()
            .chain(std::iter::once(&self.not_found))
            .find(|r| r.name == name)
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteDef> {
        self.routes.iter()
    }

    pub fn protected_routes(&self) -> impl Iterator<Item = &RouteDef> {
        self.routes.iter().filter(|r| r.meta.requires_auth)
    }

    pub fn guest_only_routes(&self) -> impl Iterator<Item = &RouteDef> {
        self.routes.iter().filter(|r| r.meta.guest_only)
    }

    /// Match a location, following aliases first. Unknown paths resolve to
    /// the catch-all.
    pub fn resolve(&self, location: &Location) -> Result<ResolvedRoute<'_>, RouteError> {
        let mut current = location.clone();
        let mut aliased_from = None;
        let mut seen = HashSet::new();

        while let Some((_, to)) = self.aliases.iter().find(|(from, _)| paths_equal(from, &current.path)) {
            if !seen.insert(current.path.clone()) || seen.len() > MAX_ALIAS_DEPTH {
                return Err(RouteError::RedirectLoop(location.full_path()));
            }
            aliased_from.get_or_insert_with(|| location.full_path());
            current.path = to.clone();
        }

        let (route, params) = self
            .routes
            .iter()
            .find_map(|route| route.matches(&current.path).map(|params| (route, params)))
            .unwrap_or_else(|| {
                let mut params = BTreeMap::new();
                params.insert("pathMatch".to_string(), current.path.trim_start_matches('/').to_string());
                (&self.not_found, params)
            });

        Ok(ResolvedRoute {
            route,
            location: current,
            params,
            aliased_from,
        })
    }
}

fn paths_equal(a: &str, b: &str) -> bool {
    segments(a).eq(segments(b))
}

impl Default for RouteTable {
    /// The travel application's routes
    fn default() -> Self {
        let not_found = RouteDef::new(
            NOT_FOUND_ROUTE,
            "/:pathMatch",
            RouteMeta::public(
                "Page Not Found - So Where To?",
                "The page you are looking for does not exist",
            ),
        );

        RouteTable::new(not_found)
            // Public
            .route(RouteDef::new(
                HOME_ROUTE,
                "/",
                RouteMeta::public(
                    "So Where To? - Mystery Travel Adventures",
                    "Book mystery travel bundles worldwide. Flights + accommodation included. Destination revealed after purchase.",
                ),
            ))
            .route(RouteDef::new(
                "how-it-works",
                "/how-it-works",
                RouteMeta::public(
                    "How It Works - So Where To?",
                    "Learn how mystery travel works in three simple steps. Spin, book, reveal - your adventure awaits!",
                ),
            ))
            .route(RouteDef::new(
                "destinations",
                "/destinations",
                RouteMeta::public(
                    "Destinations - So Where To?",
                    "Explore possible mystery destinations around the world. From Tokyo to Cape Town, the world is your mystery box.",
                ),
            ))
            .route(RouteDef::new(
                "spin",
                "/spin",
                RouteMeta::public(
                    "Spin the Globe - So Where To?",
                    "Spin the globe and let fate decide your next adventure. Mystery destinations with flights and accommodation included.",
                ),
            ))
            // Guests only
            .route(RouteDef::new(
                LOGIN_ROUTE,
                "/login",
                RouteMeta::guest_only(
                    "Login - So Where To?",
                    "Sign in to your account to manage bookings and spin the globe.",
                ),
            ))
            .route(RouteDef::new(
                "register",
                "/register",
                RouteMeta::guest_only(
                    "Register - So Where To?",
                    "Create an account to start your mystery travel journey.",
                ),
            ))
            .route(RouteDef::new(
                "forgot-password",
                "/forgot-password",
                RouteMeta::guest_only("Forgot Password - So Where To?", "Reset your password"),
            ))
            .route(RouteDef::new(
                "reset-password",
                "/reset-password/:token",
                RouteMeta::guest_only("Reset Password - So Where To?", "Set a new password"),
            ))
            .route(RouteDef::new(
                "verify-email",
                "/verify-email/:token",
                RouteMeta::public("Verify Email - So Where To?", "Verify your email address")
                    .with_layout(Layout::Auth),
            ))
            // Signed in
            .route(RouteDef::new(
                "dashboard",
                "/dashboard",
                RouteMeta::protected("Dashboard - So Where To?", "Your personal travel dashboard"),
            ))
            .route(RouteDef::new(
                "bookings",
                "/bookings",
                RouteMeta::protected(
                    "My Bookings - So Where To?",
                    "View and manage your mystery travel bookings",
                ),
            ))
            .route(RouteDef::new(
                "booking-details",
                "/booking/:id",
                RouteMeta::protected("Booking Details - So Where To?", "View your booking details"),
            ))
            .route(RouteDef::new(
                "profile",
                "/profile",
                RouteMeta::protected("My Profile - So Where To?", "Manage your profile and preferences"),
            ))
            .route(RouteDef::new(
                "wishlist",
                "/wishlist",
                RouteMeta::protected("My Wishlist - So Where To?", "Your saved destinations"),
            ))
            .route(RouteDef::new(
                "cart",
                "/cart",
                RouteMeta::protected("Shopping Cart - So Where To?", "Review your mystery bookings"),
            ))
            .route(RouteDef::new(
                "checkout",
                "/checkout",
                RouteMeta::protected("Checkout - So Where To?", "Complete your booking")
                    .with_layout(Layout::Checkout),
            ))
            // Static pages
            .route(RouteDef::new(
                "contact",
                "/contact",
                RouteMeta::public("Contact Us - So Where To?", "Get in touch with our support team"),
            ))
            .route(RouteDef::new(
                "faq",
                "/faq",
                RouteMeta::public("FAQ - So Where To?", "Frequently asked questions about mystery travel"),
            ))
            .route(RouteDef::new(
                "terms",
                "/terms",
                RouteMeta::public("Terms of Service - So Where To?", "Our terms and conditions"),
            ))
            .route(RouteDef::new(
                "privacy",
                "/privacy",
                RouteMeta::public("Privacy Policy - So Where To?", "How we handle your data"),
            ))
            .alias("/support", "/contact")
            .alias("/help", "/faq")
            .alias("/my-account", "/profile")
            .alias("/trips", "/bookings")
    }
}
