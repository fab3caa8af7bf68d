use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
pub struct Assets;

pub async fn index_handler() -> impl IntoResponse {
    match Assets::get("index.html") {
        Some(asset) => file_response("index.html", asset.data.into_owned()).into_response(),
        None => (StatusCode::NOT_FOUND, "Front page missing from build").into_response(),
    }
}

/// Response carrying `data` with a content type guessed from `name`.
pub fn file_response(name: &str, data: Vec<u8>) -> Result<Response<Body>, StatusCode> {
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    let content_type =
        HeaderValue::from_str(mime.as_ref()).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(data))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
