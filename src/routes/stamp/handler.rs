use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Query},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use tracing::{debug, error, info, warn};

use crate::{
    AppState,
    error::{AppError, AppResult},
    imaging::{self, ImageOptions, UploadedFile},
    middleware::request_session,
    result::ApiResult,
    routes::{Params, page_context, read_form, redirect_to, require_auth},
    session::{FlashKind, Session},
    utils::format_file_size,
    views::{
        PageLink, SelectOption, StampCard, StampCreateTemplate, StampEditTemplate, StampFormView,
        StampIndexTemplate, StampShowTemplate, StampView, image_views, lookup_options, render,
        render_with_status,
    },
};

use super::model::{
    ListQuery, Lookups, SortOrder, StampDetail, StampForm, StampImage, StampSummary,
};

const NOT_FOUND: &str = "Timbre non trouvé.";

/// Resolves the logged-in user or returns the login redirect from the handler.
macro_rules! authenticated {
    ($state:expr, $session:expr, $req:expr) => {
        match require_auth(&$state, &$session, $req.uri()).await {
            Ok(user) => user,
            Err(redirect) => return Ok(redirect),
        }
    };
}

pub async fn index(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    let session = request_session(&req);
    authenticated!(state, session, req);

    let query = Query::<ListQuery>::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();
    let filters = query.filters();
    let page_size = state.config.page_size;

    let total = StampSummary::count(&state.pool, &filters).await?;
    let total_pages = (total + page_size - 1) / page_size;
    let current_page = query.page().min(total_pages.max(1));

    let stamps =
        StampSummary::list(&state.pool, &filters, page_size, (current_page - 1) * page_size)
            .await?;
    let lookups = Lookups::load(&state.pool).await?;

    let base = state.config.base_path.clone();
    let catalogue = state.config.url("/timbres");
    let page_href = |number: i64| {
        let mut pairs = filters.query_pairs();
        pairs.push(("page", number.to_string()));
        format!(
            "{}?{}",
            catalogue,
            serde_urlencoded::to_string(pairs).unwrap_or_default()
        )
    };

    let template = StampIndexTemplate {
        page: page_context(&state, &session, "Catalogue des Timbres").await,
        stamps: stamps
            .iter()
            .map(|s| StampCard::from_summary(s, &base))
            .collect(),
        total,
        current_page,
        total_pages,
        search: filters.search.clone().unwrap_or_default(),
        certified_only: filters.certified_only,
        conditions: lookup_options(&lookups.conditions, filters.condition_id),
        countries: lookup_options(&lookups.countries, filters.country_id),
        colors: lookup_options(&lookups.colors, filters.color_id),
        sorts: SortOrder::ALL
            .iter()
            .map(|sort| SelectOption {
                value: sort.as_str().to_string(),
                label: sort.label().to_string(),
                selected: *sort == filters.sort,
            })
            .collect(),
        pages: (1..=total_pages)
            .map(|number| PageLink {
                number,
                href: page_href(number),
                current: number == current_page,
            })
            .collect(),
        previous: if current_page > 1 && current_page <= total_pages {
            page_href(current_page - 1)
        } else {
            String::new()
        },
        next: if current_page < total_pages {
            page_href(current_page + 1)
        } else {
            String::new()
        },
    };
    render(&template)
}

pub async fn create(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    let session = request_session(&req);
    authenticated!(state, session, req);

    let lookups = Lookups::load(&state.pool).await?;
    let template = StampCreateTemplate {
        page: page_context(&state, &session, "Ajouter un timbre").await,
        action: state.config.url("/timbres/store"),
        errors: Vec::new(),
        form: StampFormView::default(),
        conditions: lookup_options(&lookups.conditions, None),
        countries: lookup_options(&lookups.countries, None),
        colors: lookup_options(&lookups.colors, None),
    };
    render(&template)
}

pub async fn store(state: AppState, req: Request<Body>, _: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let user = authenticated!(state, session, req);

    if req.method() != Method::POST {
        return Ok(redirect_to(&state, "/timbres/create"));
    }

    let (form, files) = read_submission(&state, req).await?;
    let input = match form.validate() {
        Ok(input) => input,
        Err(errors) => {
            let lookups = Lookups::load(&state.pool).await?;
            let template = StampCreateTemplate {
                page: page_context(&state, &session, "Ajouter un timbre").await,
                action: state.config.url("/timbres/store"),
                errors,
                conditions: lookup_options(&lookups.conditions, form.condition()),
                countries: lookup_options(&lookups.countries, form.country()),
                colors: lookup_options(&lookups.colors, form.color()),
                form: form_view(&form),
            };
            return render_with_status(StatusCode::UNPROCESSABLE_ENTITY, &template);
        }
    };

    let stamp_id = match input.insert(&state.pool, user.user_id).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Failed to insert stamp");
            session
                .flash(FlashKind::Error, "Erreur lors de l'ajout du timbre.")
                .await;
            return Ok(redirect_to(&state, "/timbres/create"));
        }
    };
    info!(stamp_id, owner_id = user.user_id, "Stamp created");

    let stored = ingest_images(&state, stamp_id, files).await;
    let mut message = "Timbre ajouté avec succès !".to_string();
    if stored > 0 {
        message.push_str(&format!(" {} image(s) téléchargée(s).", stored));
    }
    session.flash(FlashKind::Success, message).await;

    Ok(redirect_to(&state, "/timbres"))
}

pub async fn show(state: AppState, req: Request<Body>, params: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let user = authenticated!(state, session, req);

    let Some(stamp) = find_stamp(&state, &params).await? else {
        session.flash(FlashKind::Error, NOT_FOUND).await;
        return Ok(redirect_to(&state, "/timbres"));
    };

    let images = StampImage::for_stamp(&state.pool, stamp.id).await?;
    let template = StampShowTemplate {
        page: page_context(&state, &session, &stamp.name).await,
        images: image_views(&images, stamp.primary_image_id, &state.config.base_path),
        is_owner: stamp.owner_id == user.user_id,
        stamp: StampView::from(&stamp),
    };
    render(&template)
}

pub async fn edit(state: AppState, req: Request<Body>, params: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let user = authenticated!(state, session, req);

    let Some(stamp) = find_stamp(&state, &params).await? else {
        session.flash(FlashKind::Error, NOT_FOUND).await;
        return Ok(redirect_to(&state, "/timbres"));
    };
    if stamp.owner_id != user.user_id {
        warn!(stamp_id = stamp.id, user_id = user.user_id, "Edit refused to non-owner");
        session
            .flash(
                FlashKind::Error,
                "Vous n'avez pas l'autorisation de modifier ce timbre.",
            )
            .await;
        return Ok(redirect_to(&state, "/timbres"));
    }

    let form = StampFormView {
        name: stamp.name.clone(),
        print_run: stamp.print_run.map(|n| n.to_string()).unwrap_or_default(),
        certified: stamp.certified,
        dimensions: stamp.dimensions.clone().unwrap_or_default(),
        description: stamp.description.clone().unwrap_or_default(),
    };
    let selected = (stamp.condition_id, stamp.country_id, stamp.color_id);
    render_edit(&state, &session, &stamp, form, selected, Vec::new(), StatusCode::OK).await
}

pub async fn update(state: AppState, req: Request<Body>, params: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let user = authenticated!(state, session, req);

    if req.method() != Method::POST {
        let path = match params.parse::<i64>(0) {
            Some(id) => format!("/timbres/{}/edit", id),
            None => "/timbres".to_string(),
        };
        return Ok(redirect_to(&state, &path));
    }

    let Some(stamp) = find_stamp(&state, &params).await? else {
        session.flash(FlashKind::Error, NOT_FOUND).await;
        return Ok(redirect_to(&state, "/timbres"));
    };
    if stamp.owner_id != user.user_id {
        warn!(stamp_id = stamp.id, user_id = user.user_id, "Update refused to non-owner");
        session
            .flash(
                FlashKind::Error,
                "Vous n'avez pas l'autorisation de modifier ce timbre.",
            )
            .await;
        return Ok(redirect_to(&state, "/timbres"));
    }

    let (form, files) = read_submission(&state, req).await?;
    let input = match form.validate() {
        Ok(input) => input,
        Err(errors) => {
            let selected = (form.condition(), form.country(), form.color());
            return render_edit(
                &state,
                &session,
                &stamp,
                form_view(&form),
                selected,
                errors,
                StatusCode::UNPROCESSABLE_ENTITY,
            )
            .await;
        }
    };

    if let Err(e) = input.update(&state.pool, stamp.id).await {
        error!(stamp_id = stamp.id, error = %e, "Failed to update stamp");
        session
            .flash(FlashKind::Error, "Erreur lors de la modification du timbre.")
            .await;
        return Ok(redirect_to(&state, &format!("/timbres/{}/edit", stamp.id)));
    }
    info!(stamp_id = stamp.id, "Stamp updated");

    let stored = ingest_images(&state, stamp.id, files).await;
    let mut message = "Timbre modifié avec succès !".to_string();
    if stored > 0 {
        message.push_str(&format!(" {} nouvelle(s) image(s) ajoutée(s).", stored));
    }
    session.flash(FlashKind::Success, message).await;

    Ok(redirect_to(&state, &format!("/timbres/{}", stamp.id)))
}

pub async fn delete(state: AppState, req: Request<Body>, params: Params) -> AppResult<Response> {
    let session = request_session(&req);
    let user = authenticated!(state, session, req);

    if req.method() != Method::POST {
        return Ok(redirect_to(&state, "/timbres"));
    }

    let Some(stamp) = find_stamp(&state, &params).await? else {
        session.flash(FlashKind::Error, NOT_FOUND).await;
        return Ok(redirect_to(&state, "/timbres"));
    };
    if stamp.owner_id != user.user_id {
        warn!(stamp_id = stamp.id, user_id = user.user_id, "Delete refused to non-owner");
        session
            .flash(
                FlashKind::Error,
                "Vous n'avez pas l'autorisation de supprimer ce timbre.",
            )
            .await;
        return Ok(redirect_to(&state, "/timbres"));
    }

    match StampDetail::delete(&state.pool, stamp.id).await {
        Ok(paths) => {
            info!(stamp_id = stamp.id, images = paths.len(), "Stamp deleted");
            for path in &paths {
                remove_image_file(&state, path).await;
            }
            session
                .flash(
                    FlashKind::Success,
                    format!("Timbre \"{}\" supprimé avec succès.", stamp.name),
                )
                .await;
        }
        Err(e) => {
            error!(stamp_id = stamp.id, error = %e, "Failed to delete stamp");
            session
                .flash(FlashKind::Error, "Erreur lors de la suppression du timbre.")
                .await;
        }
    }

    Ok(redirect_to(&state, "/timbres"))
}

/// JSON endpoint used by the edit page to drop a single image.
pub async fn delete_image(state: AppState, req: Request<Body>, params: Params) -> Response {
    if req.method() != Method::POST {
        return ApiResult::error("Méthode non autorisée").with_status(StatusCode::METHOD_NOT_ALLOWED);
    }

    let session = request_session(&req);
    let Some(user_id) = session.user_id().await else {
        return ApiResult::error("Non authentifié").with_status(StatusCode::UNAUTHORIZED);
    };

    let (Some(stamp_id), Some(image_id)) = (params.parse::<i64>(0), params.parse::<i64>(1)) else {
        return ApiResult::error("Image non trouvée").with_status(StatusCode::NOT_FOUND);
    };

    match StampDetail::owner_of(&state.pool, stamp_id).await {
        Ok(Some(owner_id)) if owner_id == user_id => {}
        Ok(Some(_)) => {
            warn!(stamp_id, user_id, "Image deletion refused to non-owner");
            return ApiResult::error("Non autorisé").with_status(StatusCode::FORBIDDEN);
        }
        Ok(None) => {
            return ApiResult::error(NOT_FOUND).with_status(StatusCode::NOT_FOUND);
        }
        Err(e) => {
            error!(stamp_id, error = %e, "Failed to load stamp owner");
            return ApiResult::error("Erreur lors de la suppression")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    match StampImage::delete(&state.pool, stamp_id, image_id).await {
        Ok(Some(path)) => {
            info!(stamp_id, image_id, "Stamp image deleted");
            remove_image_file(&state, &path).await;
            ApiResult::success("Image supprimée avec succès").with_status(StatusCode::OK)
        }
        Ok(None) => ApiResult::error("Image non trouvée").with_status(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(stamp_id, image_id, error = %e, "Failed to delete stamp image");
            ApiResult::error("Erreur lors de la suppression")
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn find_stamp(state: &AppState, params: &Params) -> AppResult<Option<StampDetail>> {
    match params.parse::<i64>(0) {
        Some(id) => Ok(StampDetail::find(&state.pool, id).await?),
        None => Ok(None),
    }
}

fn form_view(form: &StampForm) -> StampFormView {
    StampFormView {
        name: form.nom.clone(),
        print_run: form.tirage.clone(),
        certified: form.certifie.is_some(),
        dimensions: form.dimensions.clone(),
        description: form.description.clone(),
    }
}

async fn render_edit(
    state: &AppState,
    session: &Session,
    stamp: &StampDetail,
    form: StampFormView,
    (condition, country, color): (Option<i64>, Option<i64>, Option<i64>),
    errors: Vec<String>,
    status: StatusCode,
) -> AppResult<Response> {
    let lookups = Lookups::load(&state.pool).await?;
    let images = StampImage::for_stamp(&state.pool, stamp.id).await?;

    let template = StampEditTemplate {
        page: page_context(state, session, &format!("Modifier {}", stamp.name)).await,
        action: state.config.url(&format!("/timbres/{}/update", stamp.id)),
        stamp_id: stamp.id,
        errors,
        form,
        conditions: lookup_options(&lookups.conditions, condition),
        countries: lookup_options(&lookups.countries, country),
        colors: lookup_options(&lookups.colors, color),
        images: image_views(&images, stamp.primary_image_id, &state.config.base_path),
    };
    render_with_status(status, &template)
}

/// Reads the stamp fields and any uploaded `images` parts. Urlencoded bodies
/// carry no files.
async fn read_submission(
    state: &AppState,
    req: Request<Body>,
) -> AppResult<(StampForm, Vec<UploadedFile>)> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if !is_multipart {
        let form: StampForm = read_form(state, req).await?;
        return Ok((form, Vec::new()));
    }

    let mut multipart = Multipart::from_request(req, state)
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut form = StampForm::default();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "images" || name == "images[]" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().unwrap_or_default().to_string();
            match field.bytes().await {
                Ok(bytes) => files.push(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                }),
                Err(e) => warn!(file = %file_name, error = %e, "Upload interrupted, file skipped"),
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            form.set(&name, value);
        }
    }

    Ok((form, files))
}

/// Optimises and stores each uploaded file, recording it against the stamp. The
/// first stored image becomes the cover when the stamp has none. Returns the
/// number of images stored.
async fn ingest_images(state: &AppState, stamp_id: i64, files: Vec<UploadedFile>) -> usize {
    let options = ImageOptions {
        max_dimension: state.config.image_max_dimension,
        webp_output: state.config.image_webp_output,
    };
    let upload_dir = state.config.upload_dir();

    let mut stored = 0;
    let mut original_total = 0u64;
    let mut stored_total = 0u64;

    for (number, file) in files.into_iter().enumerate() {
        if file.bytes.is_empty() {
            debug!(file = %file.file_name, "Empty upload skipped");
            continue;
        }

        let file_name = file.file_name.clone();
        let saved = match imaging::save_upload(&upload_dir, stamp_id, number, file, options).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(stamp_id, file = %file_name, error = %e, "Uploaded image rejected");
                continue;
            }
        };

        let image_id = match StampImage::add(&state.pool, stamp_id, &saved.public_path).await {
            Ok(id) => id,
            Err(e) => {
                error!(stamp_id, error = %e, "Failed to record stamp image");
                if let Err(e) = tokio::fs::remove_file(&saved.disk_path).await {
                    warn!(path = %saved.disk_path.display(), error = %e, "Failed to remove unrecorded image");
                }
                continue;
            }
        };

        match StampImage::set_primary_if_none(&state.pool, stamp_id, image_id).await {
            Ok(true) => debug!(stamp_id, image_id, "Cover image set"),
            Ok(false) => {}
            Err(e) => error!(stamp_id, image_id, error = %e, "Failed to set cover image"),
        }

        info!(
            stamp_id,
            file = %file_name,
            original = %format_file_size(saved.original_size),
            stored = %format_file_size(saved.stored_size),
            path = %saved.public_path,
            "Stamp image stored"
        );
        stored += 1;
        original_total += saved.original_size;
        stored_total += saved.stored_size;
    }

    if stored > 0 && original_total > 0 {
        let saved_ratio = 100.0 - (stored_total as f64 / original_total as f64 * 100.0);
        info!(
            stamp_id,
            images = stored,
            original = %format_file_size(original_total),
            stored = %format_file_size(stored_total),
            "Compression saved {:.1}%",
            saved_ratio
        );
    }

    stored
}

async fn remove_image_file(state: &AppState, public_path: &str) {
    let path = imaging::disk_path(&state.config.public_dir, public_path);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove image file");
    }
}
