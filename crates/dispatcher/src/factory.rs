//! 任务工厂
//!
//! 持久化记录只保存类型名称与序列化状态，工厂负责把它们还原成可执行的任务。
//! 两种策略：
//!
//! - [`SerializerTaskFactory`]：直接反序列化出任务
//! - [`InjectedTaskFactory`]：从 [`ServiceContainer`] 获取新实例（协作对象已就绪），
//!   再通过 [`Task::load`] 加载序列化状态中的调度配置

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::task::{Task, TaskType};
use scheduler_core::TaskFactoryKind;
use scheduler_errors::{SchedulerError, SchedulerResult};

type DeserializeFn = fn(&str) -> SchedulerResult<Box<dyn Task>>;

fn deserialize_task<T: TaskType>(data: &str) -> SchedulerResult<Box<dyn Task>> {
    let task: T = serde_json::from_str(data)?;
    Ok(Box::new(task))
}

#[derive(Clone, Copy)]
struct TaskTypeEntry {
    deserialize: DeserializeFn,
    needs_injection: bool,
}

/// 已注册的任务类型
#[derive(Default, Clone)]
pub struct TaskTypeRegistry {
    entries: HashMap<&'static str, TaskTypeEntry>,
}

impl TaskTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: TaskType>(&mut self) -> &mut Self {
        self.entries.insert(
            T::TYPE_NAME,
            TaskTypeEntry {
                deserialize: deserialize_task::<T>,
                needs_injection: T::NEEDS_INJECTION,
            },
        );
        debug!("注册任务类型: {}", T::TYPE_NAME);
        self
    }

    pub fn with<T: TaskType>(mut self) -> Self {
        self.register::<T>();
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn needs_injection(&self, type_name: &str) -> bool {
        self.entries
            .get(type_name)
            .map(|entry| entry.needs_injection)
            .unwrap_or(false)
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn resolve(&self, type_name: &str) -> SchedulerResult<&TaskTypeEntry> {
        if type_name.trim().is_empty() {
            return Err(SchedulerError::UnknownTaskType {
                type_name: type_name.to_string(),
            });
        }
        self.entries
            .get(type_name)
            .ok_or_else(|| SchedulerError::UnknownTaskType {
                type_name: type_name.to_string(),
            })
    }

    fn deserialize(&self, type_name: &str, data: &str) -> SchedulerResult<Box<dyn Task>> {
        let entry = self.resolve(type_name)?;
        (entry.deserialize)(data)
    }
}

/// 根据类型名称与序列化状态构建任务
pub trait TaskFactory: Send + Sync {
    fn create(&self, type_name: &str, data: &str) -> SchedulerResult<Box<dyn Task>>;

    fn kind(&self) -> TaskFactoryKind;
}

/// 直接反序列化的工厂
pub struct SerializerTaskFactory {
    registry: Arc<TaskTypeRegistry>,
}

impl SerializerTaskFactory {
    pub fn new(registry: Arc<TaskTypeRegistry>) -> Self {
        Self { registry }
    }
}

impl TaskFactory for SerializerTaskFactory {
    fn create(&self, type_name: &str, data: &str) -> SchedulerResult<Box<dyn Task>> {
        self.registry.deserialize(type_name, data)
    }

    fn kind(&self) -> TaskFactoryKind {
        TaskFactoryKind::Serializer
    }
}

type Provider = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// 任务实例容器
///
/// 按任务类型登记构建函数，每次获取都会得到一个新的实例。
#[derive(Default, Clone)]
pub struct ServiceContainer {
    providers: HashMap<String, Provider>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(&mut self, provider: F) -> &mut Self
    where
        T: TaskType,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.providers.insert(
            T::TYPE_NAME.to_string(),
            Arc::new(move || Box::new(provider()) as Box<dyn Task>),
        );
        self
    }

    pub fn get_task(&self, type_name: &str) -> SchedulerResult<Box<dyn Task>> {
        self.providers
            .get(type_name)
            .map(|provider| provider())
            .ok_or_else(|| {
                SchedulerError::construction_error(format!("容器中没有注册任务类型 {type_name}"))
            })
    }
}

/// 从容器获取实例的工厂
pub struct InjectedTaskFactory {
    registry: Arc<TaskTypeRegistry>,
    container: Arc<ServiceContainer>,
}

impl InjectedTaskFactory {
    pub fn new(registry: Arc<TaskTypeRegistry>, container: Arc<ServiceContainer>) -> Self {
        Self {
            registry,
            container,
        }
    }
}

impl TaskFactory for InjectedTaskFactory {
    fn create(&self, type_name: &str, data: &str) -> SchedulerResult<Box<dyn Task>> {
        let origin = self.registry.deserialize(type_name, data)?;
        let mut task = self.container.get_task(type_name)?;
        task.load(origin.as_ref());
        Ok(task)
    }

    fn kind(&self) -> TaskFactoryKind {
        TaskFactoryKind::Injected
    }
}

/// 按配置选择工厂
pub fn create_task_factory(
    kind: TaskFactoryKind,
    registry: Arc<TaskTypeRegistry>,
    container: Arc<ServiceContainer>,
) -> Arc<dyn TaskFactory> {
    match kind {
        TaskFactoryKind::Serializer => Arc::new(SerializerTaskFactory::new(registry)),
        TaskFactoryKind::Injected => Arc::new(InjectedTaskFactory::new(registry, container)),
    }
}
