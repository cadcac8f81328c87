//! Route table and the status gate in front of the dashboard.

use serde::Serialize;

use crate::schools::SchoolStatus;

/// Pages nested under `/dashboard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DashboardPage {
    Overview,
    Applicants,
    Classes,
    AdmissionsSettings,
    Analytics,
    Payments,
    Settings,
    CreateSchool,
    PendingApproval,
}

impl DashboardPage {
    const ALL: [DashboardPage; 9] = [
        DashboardPage::Overview,
        DashboardPage::Applicants,
        DashboardPage::Classes,
        DashboardPage::AdmissionsSettings,
        DashboardPage::Analytics,
        DashboardPage::Payments,
        DashboardPage::Settings,
        DashboardPage::CreateSchool,
        DashboardPage::PendingApproval,
    ];

    pub const fn path(self) -> &'static str {
        match self {
            DashboardPage::Overview => "/dashboard",
            DashboardPage::Applicants => "/dashboard/applicants",
            DashboardPage::Classes => "/dashboard/classes",
            DashboardPage::AdmissionsSettings => "/dashboard/admissions-settings",
            DashboardPage::Analytics => "/dashboard/analytics",
            DashboardPage::Payments => "/dashboard/payments",
            DashboardPage::Settings => "/dashboard/settings",
            DashboardPage::CreateSchool => "/dashboard/create-school",
            DashboardPage::PendingApproval => "/dashboard/pending-approval",
        }
    }

    /// Onboarding pages stay reachable before the school is verified.
    const fn is_onboarding(self) -> bool {
        matches!(self, DashboardPage::CreateSchool | DashboardPage::PendingApproval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "page", rename_all = "kebab-case")]
pub enum AppRoute {
    Home,
    Login,
    Register,
    AuthCallback,
    Dashboard(DashboardPage),
    NotFound(String),
}

impl AppRoute {
    /// Maps a request path to a route. Query strings, fragments and trailing slashes are ignored.
    pub fn parse(raw: &str) -> Self {
        let path = raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');

        match path {
            "" => AppRoute::Home,
            "/auth/login" => AppRoute::Login,
            "/auth/register" => AppRoute::Register,
            "/auth/callback" => AppRoute::AuthCallback,
            other => DashboardPage::ALL
                .into_iter()
                .find(|page| page.path() == other)
                .map(AppRoute::Dashboard)
                .unwrap_or_else(|| AppRoute::NotFound(other.to_string())),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            AppRoute::Home => "/",
            AppRoute::Login => "/auth/login",
            AppRoute::Register => "/auth/register",
            AppRoute::AuthCallback => "/auth/callback",
            AppRoute::Dashboard(page) => page.path(),
            AppRoute::NotFound(path) => path,
        }
    }
}

/// What the router does with a requested route given the current school status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "route", rename_all = "snake_case")]
pub enum GateDecision {
    Render,
    /// Status is still loading; show a placeholder and decide on the next snapshot.
    Wait,
    Redirect(AppRoute),
}

/// Public routes always render; dashboard routes are gated on the school status.
pub fn gate(route: &AppRoute, status: SchoolStatus) -> GateDecision {
    let AppRoute::Dashboard(page) = route else {
        return GateDecision::Render;
    };
    let page = *page;

    let required = match status {
        SchoolStatus::Unresolved => return GateDecision::Redirect(AppRoute::Login),
        SchoolStatus::Loading => return GateDecision::Wait,
        SchoolStatus::NoSchool => DashboardPage::CreateSchool,
        SchoolStatus::Pending | SchoolStatus::Rejected => DashboardPage::PendingApproval,
        SchoolStatus::Verified if page.is_onboarding() => {
            return GateDecision::Redirect(AppRoute::Dashboard(DashboardPage::Overview))
        }
        SchoolStatus::Verified => return GateDecision::Render,
    };

    if page == required {
        GateDecision::Render
    } else {
        GateDecision::Redirect(AppRoute::Dashboard(required))
    }
}

/// Performs client-side navigation.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: AppRoute);
}
