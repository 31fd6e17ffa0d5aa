//! Askama templates and the flat view models they render.
//!
//! Templates only see plain strings, numbers and booleans; controllers build
//! these from model rows so no formatting logic lives in the HTML files.

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::{
    config::Config,
    error::AppError,
    routes::stamp::model::{Lookup, StampDetail, StampImage, StampSummary},
    session::{FlashMessage, SessionUser},
};

pub struct FlashView {
    pub kind: &'static str,
    pub message: String,
}

/// Data every page layout needs.
pub struct PageContext {
    pub base: String,
    pub title: String,
    pub logged_in: bool,
    pub user_name: String,
    pub flashes: Vec<FlashView>,
}

impl PageContext {
    pub fn new(
        config: &Config,
        title: impl Into<String>,
        user: Option<&SessionUser>,
        flashes: Vec<FlashMessage>,
    ) -> Self {
        Self {
            base: config.base_path.clone(),
            title: title.into(),
            logged_in: user.is_some(),
            user_name: user.map(|u| u.display_name.clone()).unwrap_or_default(),
            flashes: flashes
                .into_iter()
                .map(|f| FlashView {
                    kind: f.kind.as_str(),
                    message: f.message,
                })
                .collect(),
        }
    }
}

pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

pub fn lookup_options(lookups: &[Lookup], selected: Option<i64>) -> Vec<SelectOption> {
    lookups
        .iter()
        .map(|l| SelectOption {
            value: l.id.to_string(),
            label: l.name.clone(),
            selected: Some(l.id) == selected,
        })
        .collect()
}

/// Card shown in the catalogue grid and on the home page.
pub struct StampCard {
    pub id: i64,
    pub name: String,
    pub image: String,
    pub country: String,
    pub condition: String,
    pub color: String,
    pub owner: String,
    pub certified: bool,
    pub created_on: String,
}

impl StampCard {
    pub fn from_summary(summary: &StampSummary, base: &str) -> Self {
        Self {
            id: summary.id,
            name: summary.name.clone(),
            image: summary
                .primary_image
                .as_deref()
                .map(|p| format!("{}{}", base, p))
                .unwrap_or_default(),
            country: summary.country.clone().unwrap_or_default(),
            condition: summary.condition.clone().unwrap_or_default(),
            color: summary.color.clone().unwrap_or_default(),
            owner: summary.owner_username.clone().unwrap_or_default(),
            certified: summary.certified,
            created_on: summary.created_at.format("%d/%m/%Y").to_string(),
        }
    }
}

pub struct ImageView {
    pub id: i64,
    pub src: String,
    pub primary: bool,
}

/// Images ordered for display, the cover first.
pub fn image_views(images: &[StampImage], primary_id: Option<i64>, base: &str) -> Vec<ImageView> {
    let mut views: Vec<ImageView> = images
        .iter()
        .map(|img| ImageView {
            id: img.id,
            src: format!("{}{}", base, img.path),
            primary: Some(img.id) == primary_id,
        })
        .collect();
    views.sort_by_key(|v| !v.primary);
    views
}

pub struct StampView {
    pub id: i64,
    pub name: String,
    pub condition: String,
    pub country: String,
    pub color: String,
    pub print_run: String,
    pub certified: bool,
    pub dimensions: String,
    pub description: String,
    pub owner: String,
    pub created_on: String,
}

impl From<&StampDetail> for StampView {
    fn from(stamp: &StampDetail) -> Self {
        Self {
            id: stamp.id,
            name: stamp.name.clone(),
            condition: stamp.condition.clone().unwrap_or_default(),
            country: stamp.country.clone().unwrap_or_default(),
            color: stamp.color.clone().unwrap_or_default(),
            print_run: stamp.print_run.map(|n| n.to_string()).unwrap_or_default(),
            certified: stamp.certified,
            dimensions: stamp.dimensions.clone().unwrap_or_default(),
            description: stamp.description.clone().unwrap_or_default(),
            owner: stamp.owner_username.clone().unwrap_or_default(),
            created_on: stamp.created_at.format("%d/%m/%Y à %H:%M").to_string(),
        }
    }
}

/// Values echoed back into the stamp form.
#[derive(Default)]
pub struct StampFormView {
    pub name: String,
    pub print_run: String,
    pub certified: bool,
    pub dimensions: String,
    pub description: String,
}

pub struct PageLink {
    pub number: i64,
    pub href: String,
    pub current: bool,
}

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub page: PageContext,
    pub recent: Vec<StampCard>,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub page: PageContext,
    pub redirect: String,
}

#[derive(Default)]
pub struct RegisterFormView {
    pub first_name: String,
    pub username: String,
    pub email: String,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub form: RegisterFormView,
}

#[derive(Template)]
#[template(path = "stamps/index.html")]
pub struct StampIndexTemplate {
    pub page: PageContext,
    pub stamps: Vec<StampCard>,
    pub total: i64,
    pub current_page: i64,
    pub total_pages: i64,
    pub search: String,
    pub certified_only: bool,
    pub conditions: Vec<SelectOption>,
    pub countries: Vec<SelectOption>,
    pub colors: Vec<SelectOption>,
    pub sorts: Vec<SelectOption>,
    pub pages: Vec<PageLink>,
    pub previous: String,
    pub next: String,
}

#[derive(Template)]
#[template(path = "stamps/create.html")]
pub struct StampCreateTemplate {
    pub page: PageContext,
    pub action: String,
    pub errors: Vec<String>,
    pub form: StampFormView,
    pub conditions: Vec<SelectOption>,
    pub countries: Vec<SelectOption>,
    pub colors: Vec<SelectOption>,
}

#[derive(Template)]
#[template(path = "stamps/edit.html")]
pub struct StampEditTemplate {
    pub page: PageContext,
    pub action: String,
    pub stamp_id: i64,
    pub errors: Vec<String>,
    pub form: StampFormView,
    pub conditions: Vec<SelectOption>,
    pub countries: Vec<SelectOption>,
    pub colors: Vec<SelectOption>,
    pub images: Vec<ImageView>,
}

#[derive(Template)]
#[template(path = "stamps/show.html")]
pub struct StampShowTemplate {
    pub page: PageContext,
    pub stamp: StampView,
    pub images: Vec<ImageView>,
    pub is_owner: bool,
}

pub fn render<T: Template>(template: &T) -> Result<Response, AppError> {
    render_with_status(StatusCode::OK, template)
}

pub fn render_with_status<T: Template>(
    status: StatusCode,
    template: &T,
) -> Result<Response, AppError> {
    let body = template.render()?;
    Ok((status, Html(body)).into_response())
}
