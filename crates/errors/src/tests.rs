use super::*;

#[test]
fn test_error_messages() {
    let err = ScriptFlowError::task_not_found("t1");
    assert_eq!(err.to_string(), "任务未找到: t1");

    let err = ScriptFlowError::RunNotActive {
        id: "r1".to_string(),
    };
    assert_eq!(err.to_string(), "运行 r1 不在执行中");

    let err = ScriptFlowError::invalid_schedule("H(30-10) * * * *", "min > max");
    assert!(err.to_string().contains("H(30-10)"));
}

#[test]
fn test_is_skip() {
    assert!(ScriptFlowError::TaskNotActive.is_skip());
    assert!(ScriptFlowError::NodeNotOnline.is_skip());
    assert!(ScriptFlowError::task_not_found("t1").is_skip());
    assert!(!ScriptFlowError::internal("boom").is_skip());
    assert!(!ScriptFlowError::log_file("io").is_skip());
}

#[test]
fn test_is_not_found() {
    assert!(ScriptFlowError::run_not_found("r1").is_not_found());
    assert!(ScriptFlowError::RunNotActive {
        id: "r1".to_string()
    }
    .is_not_found());
    assert!(!ScriptFlowError::NodeNotOnline.is_not_found());
}

#[test]
fn test_from_serde_json() {
    let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err: ScriptFlowError = json_err.into();
    assert!(matches!(err, ScriptFlowError::Serialization(_)));
}

#[test]
fn test_from_anyhow() {
    let err: ScriptFlowError = anyhow::anyhow!("出错了").into();
    assert!(matches!(err, ScriptFlowError::Internal(_)));
    assert_eq!(err.to_string(), "内部错误: 出错了");
}
