use once_cell::sync::Lazy;
use tera::Tera;

use scriptflow_errors::{ScriptFlowError, ScriptFlowResult};

use super::send::MessageContext;

const EMAIL_TEMPLATE: &str = include_str!("../../templates/notification_email.html");
const SLACK_TEMPLATE: &str = include_str!("../../templates/notification_slack.md");

static TEMPLATES: Lazy<Tera> = Lazy::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_template("notification_email.html", EMAIL_TEMPLATE)
        .expect("邮件模板非法");
    tera.add_raw_template("notification_slack.md", SLACK_TEMPLATE)
        .expect("slack模板非法");
    tera
});

pub(crate) fn render_email(mc: &MessageContext) -> ScriptFlowResult<String> {
    render("notification_email.html", mc)
}

pub(crate) fn render_slack(mc: &MessageContext) -> ScriptFlowResult<String> {
    render("notification_slack.md", mc)
}

fn render(template: &str, mc: &MessageContext) -> ScriptFlowResult<String> {
    let context = tera::Context::from_serialize(mc)
        .map_err(|e| ScriptFlowError::internal(format!("构建模板上下文失败: {e}")))?;
    TEMPLATES
        .render(template, &context)
        .map_err(|e| ScriptFlowError::internal(format!("渲染通知模板失败: {e}")))
}
