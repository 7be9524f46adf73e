use std::sync::Arc;

use axum::{Json, extract::State};
use tracing::debug;

use mango_types::api::{EnginesResponse, ImageRequest, ImageResponse, PromptAnswer, PromptRequest};

use crate::auth::AppState;
use crate::completions::{CompletionError, CompletionProvider};
use crate::error::{ApiError, ApiResult};

pub const IMAGE_SIZES: &[&str] = &["256x256", "512x512", "1024x1024"];
pub const DEFAULT_IMAGE_SIZE: &str = "512x512";
pub const IMAGES_PER_PROMPT: u8 = 4;

fn provider(state: &AppState) -> ApiResult<Arc<dyn CompletionProvider>> {
    state
        .completions
        .clone()
        .ok_or_else(|| ApiError::Unavailable("Completion API key is not configured".into()))
}

fn upstream(err: CompletionError) -> ApiError {
    ApiError::Upstream(err.to_string())
}

fn require_prompt(prompt: &str) -> ApiResult<()> {
    if prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Prompt must not be empty".into()));
    }
    Ok(())
}

pub async fn complete(
    State(state): State<AppState>,
    Json(req): Json<PromptRequest>,
) -> ApiResult<Json<PromptAnswer>> {
    require_prompt(&req.prompt)?;
    let provider = provider(&state)?;

    let answer = provider.complete(&req.prompt).await.map_err(upstream)?;
    debug!("Completion returned {} chars", answer.len());
    Ok(Json(PromptAnswer { answer }))
}

pub async fn generate_images(
    State(state): State<AppState>,
    Json(req): Json<ImageRequest>,
) -> ApiResult<Json<ImageResponse>> {
    require_prompt(&req.prompt)?;

    let size = req.image_size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE);
    if !IMAGE_SIZES.contains(&size) {
        return Err(ApiError::BadRequest(format!(
            "image_size must be one of {}",
            IMAGE_SIZES.join(", ")
        )));
    }

    let provider = provider(&state)?;
    let images = provider
        .generate_images(&req.prompt, size, IMAGES_PER_PROMPT)
        .await
        .map_err(upstream)?;
    Ok(Json(ImageResponse { images }))
}

pub async fn list_engines(State(state): State<AppState>) -> ApiResult<Json<EnginesResponse>> {
    let engines = provider(&state)?.list_engines().await.map_err(upstream)?;
    Ok(Json(EnginesResponse { engines }))
}
