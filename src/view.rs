//! Calculation detail view controller.
//!
//! Mounting fetches the calculation named by the page route and moves the
//! view from `Loading` to `Detail`, `NotFound` or `Error`. A 401 at any point
//! tears the shared session down and navigates to the login page. Alerts
//! clear themselves after [`ALERT_TIMEOUT`]; a successful delete navigates
//! back to the listing after [`REDIRECT_DELAY`]. Both timers are owned by the
//! controller and aborted when it is dropped, so nothing touches the view
//! after unmount.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api_client::{ApiError, CalculationApi};
use crate::calculation::{Calculation, format_number};
use crate::session::SessionState;

pub const ALERT_TIMEOUT: Duration = Duration::from_secs(5);
pub const REDIRECT_DELAY: Duration = Duration::from_secs(1);

pub const LOGIN_ROUTE: &str = "/login";
pub const LISTING_ROUTE: &str = "/dashboard";
pub const VIEW_ROUTE_PREFIX: &str = "/dashboard/view/";

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Loading,
    Detail(Calculation),
    NotFound,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
}

/// Where the view wants the browser to go next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Login,
    Listing,
}

impl Navigation {
    pub fn route(&self) -> &'static str {
        match self {
            Navigation::Login => LOGIN_ROUTE,
            Navigation::Listing => LISTING_ROUTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub state: ViewState,
    pub alert: Option<Alert>,
    pub delete_enabled: bool,
    pub navigation: Option<Navigation>,
}

impl Default for ViewModel {
    fn default() -> Self {
        ViewModel {
            state: ViewState::Loading,
            alert: None,
            delete_enabled: false,
            navigation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Not confirmed, or nothing deletable on screen.
    Cancelled,
    Deleted,
    Failed,
}

/// Route for the detail page of `id`.
pub fn view_route(id: Uuid) -> String {
    format!("{VIEW_ROUTE_PREFIX}{id}")
}

/// The calculation id at the end of a detail route.
pub fn id_from_route(route: &str) -> Option<Uuid> {
    route.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

pub struct CalculationView<A> {
    api: A,
    session: SessionState,
    model: Arc<Mutex<ViewModel>>,
    alert_timer: Option<JoinHandle<()>>,
    redirect_timer: Option<JoinHandle<()>>,
}

impl<A: CalculationApi> CalculationView<A> {
    pub fn new(api: A, session: SessionState) -> Self {
        CalculationView {
            api,
            session,
            model: Arc::new(Mutex::new(ViewModel::default())),
            alert_timer: None,
            redirect_timer: None,
        }
    }

    /// Load the calculation named by `route`.
    pub async fn mount(&mut self, route: &str) {
        self.cancel_timers();
        *self.model.lock() = ViewModel::default();

        let Some(id) = id_from_route(route) else {
            log::debug!("no calculation id in route {route}");
            self.model.lock().state = ViewState::NotFound;
            return;
        };

        match self.api.get(id).await {
            Ok(calc) => {
                let mut model = self.model.lock();
                model.state = ViewState::Detail(calc);
                model.delete_enabled = true;
            }
            Err(ApiError::Unauthorized) => self.expire_session(),
            Err(ApiError::NotFound) => self.model.lock().state = ViewState::NotFound,
            Err(e) => {
                self.model.lock().state = ViewState::Error;
                self.show_alert(AlertKind::Error, format!("Failed to load calculation: {e}"));
            }
        }
    }

    /// Delete the displayed calculation once `confirm` agrees.
    pub async fn delete(&mut self, confirm: impl FnOnce(&Calculation) -> bool) -> DeleteOutcome {
        let calc = {
            let model = self.model.lock();
            match &model.state {
                ViewState::Detail(calc) if model.delete_enabled && model.navigation.is_none() => {
                    calc.clone()
                }
                _ => return DeleteOutcome::Cancelled,
            }
        };

        if !confirm(&calc) {
            return DeleteOutcome::Cancelled;
        }

        self.model.lock().delete_enabled = false;
        match self.api.delete(calc.id).await {
            Ok(()) => {
                log::info!("deleted calculation {}", calc.id);
                self.show_alert(
                    AlertKind::Success,
                    "Calculation deleted successfully".to_string(),
                );
                self.schedule_navigation(Navigation::Listing, REDIRECT_DELAY);
                DeleteOutcome::Deleted
            }
            Err(ApiError::Unauthorized) => {
                self.expire_session();
                DeleteOutcome::Failed
            }
            Err(e) => {
                self.model.lock().delete_enabled = true;
                self.show_alert(AlertKind::Error, format!("Failed to delete calculation: {e}"));
                DeleteOutcome::Failed
            }
        }
    }

    /// The only action offered from `NotFound`, though it works from any state.
    pub fn return_to_listing(&mut self) {
        self.model.lock().navigation = Some(Navigation::Listing);
    }
}

impl<A> CalculationView<A> {
    pub fn dismiss_alert(&mut self) {
        if let Some(timer) = self.alert_timer.take() {
            timer.abort();
        }
        self.model.lock().alert = None;
    }

    pub fn snapshot(&self) -> ViewModel {
        self.model.lock().clone()
    }

    /// Wait for a scheduled navigation to fire, then report where to go.
    pub async fn wait_for_navigation(&mut self) -> Option<Navigation> {
        if let Some(timer) = self.redirect_timer.take() {
            let _ = timer.await;
        }
        self.model.lock().navigation
    }

    /// Plain-text rendering of the current view.
    pub fn render(&self) -> String {
        let model = self.model.lock();
        let mut lines = Vec::new();

        if let Some(alert) = &model.alert {
            let tag = match alert.kind {
                AlertKind::Success => "success",
                AlertKind::Error => "error",
            };
            lines.push(format!("[{tag}] {}", alert.message));
        }

        match &model.state {
            ViewState::Loading => lines.push("Loading calculation...".to_string()),
            ViewState::Detail(calc) => {
                let inputs = calc
                    .inputs
                    .iter()
                    .map(|value| format_number(*value))
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("Calculation {}", calc.id));
                lines.push(format!("Type:    {}", calc.kind.label()));
                lines.push(format!("Inputs:  {inputs}"));
                lines.push(format!("Result:  {}", format_number(calc.result)));
                lines.push(format!(
                    "Created: {}",
                    calc.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
                lines.push(format!(
                    "Updated: {}",
                    calc.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
                lines.push(String::new());
                lines.push(calc.visual());
            }
            ViewState::NotFound => {
                lines.push("Calculation not found.".to_string());
                lines.push(format!("Back to calculations: {LISTING_ROUTE}"));
            }
            ViewState::Error => lines.push("Unable to load calculation.".to_string()),
        }

        lines.join("\n")
    }

    fn expire_session(&mut self) {
        self.session.teardown();
        self.cancel_timers();
        let mut model = self.model.lock();
        model.alert = None;
        model.delete_enabled = false;
        model.navigation = Some(Navigation::Login);
    }

    fn show_alert(&mut self, kind: AlertKind, message: String) {
        if let Some(timer) = self.alert_timer.take() {
            timer.abort();
        }

        let alert = Alert { kind, message };
        self.model.lock().alert = Some(alert.clone());

        let model = Arc::clone(&self.model);
        self.alert_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(ALERT_TIMEOUT).await;
            let mut model = model.lock();
            if model.alert.as_ref() == Some(&alert) {
                model.alert = None;
            }
        }));
    }

    fn schedule_navigation(&mut self, navigation: Navigation, delay: Duration) {
        if let Some(timer) = self.redirect_timer.take() {
            timer.abort();
        }

        let model = Arc::clone(&self.model);
        self.redirect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            model.lock().navigation = Some(navigation);
        }));
    }

    fn cancel_timers(&mut self) {
        for timer in [self.alert_timer.take(), self.redirect_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
    }
}

impl<A> Drop for CalculationView<A> {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
