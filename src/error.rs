use std::path::PathBuf;

use crate::models::ItemStatus;

/// 应用程序错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 文本转换服务错误（未经过调度器，没有任务标签）
    #[error("转换错误: {0}")]
    Transform(#[from] TransformError),

    /// 调度任务最终失败（已用尽重试或不可重试）
    #[error("任务 {label} 失败: {source}")]
    Job {
        label: String,
        #[source]
        source: TransformError,
    },

    /// 递归合并超过深度上限
    #[error("递归合并超过最大深度 {max_depth} (当前输入约 {tokens} tokens)")]
    MergeDepthExceeded { max_depth: usize, tokens: usize },

    /// 提示词模板错误
    #[error("模板错误: {0}")]
    Template(#[from] TemplateError),

    /// 进度存储错误
    #[error("进度错误: {0}")]
    Progress(#[from] ProgressError),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 文件操作错误
    #[error("文件错误 ({path}): {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON 解析失败
    #[error("JSON解析失败 ({path}): {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// 后台任务异常退出
    #[error("任务执行异常: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// 文本转换服务错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// 请求频率限制（可重试）
    #[error("请求频率限制: {message}")]
    RateLimited { message: String },

    /// 输出达到长度上限被截断（配置问题，不可重试）
    #[error("输出被截断 (达到 {max_tokens} tokens 上限)，请调大输出上限后重新运行")]
    Truncated { max_tokens: u32 },

    /// 其他错误（不重试）
    #[error("{message}")]
    Failed { message: String },

    /// 调度器已停止接收新任务，本次调用未发出
    #[error("调度器已停止，任务未执行")]
    Cancelled,
}

/// 提示词模板错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// 模板中出现未声明的占位符
    #[error("模板 {template} 含有未知占位符 {{{placeholder}}}")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    /// 渲染时缺少占位符的值
    #[error("模板 {template} 缺少参数 {placeholder}")]
    MissingParameter {
        template: String,
        placeholder: String,
    },

    /// 渲染时传入了模板未声明的参数
    #[error("模板 {template} 不接受参数 {name}")]
    UnknownParameter { template: String, name: String },
}

/// 进度存储错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    /// 不允许的状态转换
    #[error("条目 {id} 不允许从 {from} 转换到 {to}")]
    InvalidTransition {
        id: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    /// 条目不存在
    #[error("条目 {id} 不存在")]
    UnknownItem { id: String },

    /// 条目没有记录输入文件
    #[error("条目 {id} 缺少输入文件")]
    MissingSource { id: String },
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// 参数值无效
    #[error("参数 {field} 无效: {reason}")]
    Invalid { field: String, reason: String },

    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件错误
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AppError::File {
            path: path.into(),
            source,
        }
    }

    /// 创建 JSON 解析错误
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        AppError::Json {
            path: path.into(),
            source,
        }
    }

    /// 是否为致命配置错误（需要修改配置，重试无意义，整个运行应立即中止）
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Transform(e) | AppError::Job { source: e, .. } => e.is_fatal(),
            AppError::Config(_) => true,
            _ => false,
        }
    }

    /// 任务因运行中止而没有执行
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AppError::Transform(TransformError::Cancelled)
                | AppError::Job {
                    source: TransformError::Cancelled,
                    ..
                }
        )
    }
}

impl TransformError {
    /// 创建普通失败错误
    pub fn failed(message: impl Into<String>) -> Self {
        TransformError::Failed {
            message: message.into(),
        }
    }

    /// 是否可重试（仅频率限制）
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransformError::RateLimited { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TransformError::Truncated { .. })
    }
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
