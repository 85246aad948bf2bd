use crate::*;

#[test]
fn test_scheduler_error_display() {
    let task_error = SchedulerError::task_not_found("job-1");
    assert_eq!(task_error.to_string(), "任务未找到: job-1");

    let cron_error = SchedulerError::InvalidCron {
        expr: "* *".to_string(),
        message: "字段数量错误".to_string(),
    };
    assert_eq!(cron_error.to_string(), "无效的CRON表达式: * * - 字段数量错误");

    let type_error = SchedulerError::UnknownTaskType {
        type_name: "missing".to_string(),
    };
    assert_eq!(type_error.to_string(), "无法解析任务类型: missing");

    assert_eq!(SchedulerError::TimerStopped.to_string(), "时间轮已停止");
    assert_eq!(
        SchedulerError::NeverOccurs { id: "a".to_string() }.to_string(),
        "任务 a 不会再被触发"
    );
}

#[test]
fn test_helper_constructors() {
    assert!(matches!(
        SchedulerError::validation_error("id"),
        SchedulerError::ValidationError(ref msg) if msg == "id"
    ));
    assert!(matches!(
        SchedulerError::invalid_schedule("past"),
        SchedulerError::InvalidSchedule(_)
    ));
    assert_eq!(
        SchedulerError::construction_error("缺少实例").to_string(),
        "任务构建失败: 缺少实例"
    );
}

#[test]
fn test_error_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let err: SchedulerError = json_err.into();
    assert!(matches!(err, SchedulerError::Serialization(_)));

    let err: SchedulerError = anyhow::anyhow!("boom").into();
    assert!(matches!(err, SchedulerError::Internal(ref msg) if msg == "boom"));
}
