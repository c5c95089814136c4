use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static MULTI_DASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());
static LEADING_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+").unwrap());
static VALID_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]{5,}$").unwrap());

/// 从名称生成记录 id
///
/// 转小写，非字母数字折叠为 '-'，去掉前导数字并修剪两端的 '-'。
/// 对任意输入幂等：f(f(x)) == f(x)。
pub fn generate_id_from_name(name: &str) -> String {
    let id = name.to_lowercase();
    let id = NON_ALNUM_RE.replace_all(&id, "-");
    let id = MULTI_DASH_RE.replace_all(&id, "-");
    let id = LEADING_DIGITS_RE.replace_all(&id, "");
    id.trim_matches('-').to_string()
}

/// 配置中的记录 id 校验：小写字母开头，总长至少 6
pub fn is_valid_id(s: &str) -> bool {
    VALID_ID_RE.is_match(s)
}
