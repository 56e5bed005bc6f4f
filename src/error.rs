use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::features::art::renderer::RenderError;
use crate::features::cache::{CacheError, InvalidPostId};

/// 应用统一错误类型（HTTP 层唯一的状态码翻译点）
#[derive(Error, Debug, utoipa::ToSchema)]
pub enum AppError {
    /// 非法的 post id（非数字 / 非正数）
    #[error("非法的 post id: {0}")]
    InvalidPostId(String),

    /// 上游不存在该 post，或缺少图片 URL
    #[error("未找到: {0}")]
    NotFound(String),

    /// 外部渲染器缺失或以非零状态退出
    #[error("字符画渲染失败: {0}")]
    Render(String),

    /// 磁盘读写错误
    #[error("I/O 错误: {0}")]
    Io(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// RFC7807 风格的错误响应（Problem Details）。
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    /// 问题类型（URI）。若无更细分的类型，可使用 about:blank。
    #[serde(rename = "type")]
    #[schema(example = "about:blank")]
    pub type_url: String,

    /// 简短标题，用于概括错误。
    #[schema(example = "Not Found")]
    pub title: String,

    /// HTTP 状态码（与响应 status 一致）。
    #[schema(example = 404)]
    pub status: u16,

    /// 人类可读的详细信息（尽量稳定，不建议依赖解析）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// 稳定的错误码，用于程序化处理。
    #[schema(example = "NOT_FOUND")]
    pub code: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidPostId(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Render(_) | AppError::Io(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn stable_code(&self) -> &'static str {
        match self {
            AppError::InvalidPostId(_) => "INVALID_POST_ID",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Render(_) => "RENDER_FAILED",
            AppError::Io(_) => "IO_FAILURE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let problem = ProblemDetails {
            type_url: "about:blank".to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: Some(self.to_string()),
            code: self.stable_code().to_string(),
        };

        let mut res = Json(problem).into_response();
        *res.status_mut() = status;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        res
    }
}

// =============== Error conversions for lower layers ===============

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<InvalidPostId> for AppError {
    fn from(err: InvalidPostId) -> Self {
        AppError::InvalidPostId(err.0)
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err.to_string())
    }
}
