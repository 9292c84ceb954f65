//! 文本转换服务 - 业务能力层
//!
//! 流水线只依赖 `Transform` 这一个能力：`transform(prompt, input) -> text`。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务都可以通过 `llm_api_base_url` 接入

use std::future::Future;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, FinishReason,
    },
    Client,
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::TransformError;

/// 文本转换能力
///
/// 实现方需要区分三类失败：频率限制（可重试）、输出截断（致命）、其他错误。
pub trait Transform: Send + Sync + 'static {
    fn transform(
        &self,
        prompt: &str,
        input: &str,
    ) -> impl Future<Output = Result<String, TransformError>> + Send;
}

/// 基于 OpenAI 兼容接口的转换服务
pub struct OpenAiTransform {
    client: Client<OpenAIConfig>,
    model_name: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiTransform {
    /// 创建转换服务，`max_tokens` 为单次调用的输出上限
    pub fn new(config: &Config, max_tokens: u32) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            max_tokens,
            temperature: config.temperature,
        }
    }

    async fn complete(&self, prompt: &str, input: &str) -> Result<String, TransformError> {
        debug!(
            "调用 LLM API，模型: {}，输入长度: {} 字符",
            self.model_name,
            input.len()
        );

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(compose_message(prompt, input))
            .build()
            .map_err(classify_error)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![ChatCompletionRequestMessage::User(user_msg)])
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(classify_error)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_error(e)
        })?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| TransformError::failed("LLM 返回结果为空"))?;

        if matches!(choice.finish_reason, Some(FinishReason::Length)) {
            return Err(TransformError::Truncated {
                max_tokens: self.max_tokens,
            });
        }

        let content = choice
            .message
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TransformError::failed("LLM 返回内容为空"))?;

        debug!("LLM API 调用成功，输出长度: {} 字符", content.len());
        Ok(content.to_string())
    }
}

impl Transform for OpenAiTransform {
    fn transform(
        &self,
        prompt: &str,
        input: &str,
    ) -> impl Future<Output = Result<String, TransformError>> + Send {
        self.complete(prompt, input)
    }
}

/// 提示词与输入放在同一条用户消息里
pub fn compose_message(prompt: &str, input: &str) -> String {
    format!("{prompt}\n\n---\n\n{input}")
}

/// API 返回的频率限制类错误码 / 错误类型
const RATE_LIMIT_KINDS: &[&str] = &["rate_limit_exceeded", "rate_limit_error", "overloaded_error"];

/// 把 API 错误归类为频率限制或普通失败
fn classify_error(err: OpenAIError) -> TransformError {
    let rate_limited = match &err {
        OpenAIError::ApiError(api) => [api.code.as_deref(), api.r#type.as_deref()]
            .into_iter()
            .flatten()
            .any(|kind| RATE_LIMIT_KINDS.contains(&kind)),
        OpenAIError::Reqwest(e) => e.status().is_some_and(|s| s.as_u16() == 429),
        _ => false,
    };

    let message = err.to_string();
    if rate_limited {
        TransformError::RateLimited { message }
    } else {
        TransformError::Failed { message }
    }
}
