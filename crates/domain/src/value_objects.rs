use scheduler_errors::{SchedulerError, SchedulerResult};

pub const MAX_TASK_ID_LENGTH: usize = 36;
pub const MAX_TASK_NAME_LENGTH: usize = 255;

/// 校验任务 id：非空且不超过36个字符
pub fn validate_task_id(id: &str) -> SchedulerResult<()> {
    if id.trim().is_empty() {
        return Err(SchedulerError::validation_error("任务id不能为空"));
    }
    if id.chars().count() > MAX_TASK_ID_LENGTH {
        return Err(SchedulerError::validation_error(format!(
            "任务id长度不能超过{MAX_TASK_ID_LENGTH}个字符"
        )));
    }
    Ok(())
}

/// 校验任务名称：非空且不超过255个字符
pub fn validate_task_name(name: &str) -> SchedulerResult<()> {
    if name.trim().is_empty() {
        return Err(SchedulerError::validation_error("任务名称不能为空"));
    }
    if name.chars().count() > MAX_TASK_NAME_LENGTH {
        return Err(SchedulerError::validation_error(format!(
            "任务名称长度不能超过{MAX_TASK_NAME_LENGTH}个字符"
        )));
    }
    Ok(())
}

pub fn validate_paging(page: u32, limit: u32) -> SchedulerResult<()> {
    if page < 1 {
        return Err(SchedulerError::validation_error("page 必须大于等于1"));
    }
    if limit < 1 {
        return Err(SchedulerError::validation_error("limit 必须大于等于1"));
    }
    Ok(())
}
