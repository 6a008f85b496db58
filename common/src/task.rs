use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::TaskNotFoundError;

/// Segmento fijo con el que se direcciona el hijo de una tarea paralela.
pub const SUBTASK_SEGMENT: &str = "subtask";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Idle,
    Running,
    Paused,
    Stopped,
    Cancelled,
    Failed,
    Complete,
}

/// Definición serializable de un árbol de tareas.
/// Es lo que se registra en el catálogo y lo que viaja en JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskDef {
    Leaf {
        name: String,
    },
    Sequential {
        name: String,
        children: Vec<TaskDef>,
    },
    Parallel {
        name: String,
        subtask: Box<TaskDef>,
    },
}

impl TaskDef {
    pub fn leaf(name: &str) -> Self {
        TaskDef::Leaf {
            name: name.to_string(),
        }
    }

    pub fn sequential(name: &str, children: Vec<TaskDef>) -> Self {
        TaskDef::Sequential {
            name: name.to_string(),
            children,
        }
    }

    pub fn parallel(name: &str, subtask: TaskDef) -> Self {
        TaskDef::Parallel {
            name: name.to_string(),
            subtask: Box::new(subtask),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TaskDef::Leaf { name } => name,
            TaskDef::Sequential { name, .. } => name,
            TaskDef::Parallel { name, .. } => name,
        }
    }
}

/// Lugar que ocupa un nodo dentro de su padre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Root,
    Child(usize),
    Subtask,
}

#[derive(Debug)]
pub enum TaskKind {
    Leaf,
    Sequential { children: Vec<Arc<Task>> },
    Parallel { subtask: Arc<Task> },
}

/// Nodo vivo del árbol de tareas.
///
/// El padre se guarda como `Weak`: sólo sirve para derivar la clave y
/// escalar estados, nunca es una relación de propiedad.
#[derive(Debug)]
pub struct Task {
    name: String,
    position: Position,
    parent: Weak<Task>,
    kind: TaskKind,
    status: Mutex<TaskStatus>,
}

impl Task {
    /// Construye el árbol completo a partir de su definición.
    /// Los enlaces al padre se fijan aquí, una sola vez.
    pub fn build(def: &TaskDef) -> Arc<Task> {
        Self::build_node(def, Weak::new(), Position::Root)
    }

    fn build_node(def: &TaskDef, parent: Weak<Task>, position: Position) -> Arc<Task> {
        Arc::new_cyclic(|me| {
            let kind = match def {
                TaskDef::Leaf { .. } => TaskKind::Leaf,
                TaskDef::Sequential { children, .. } => TaskKind::Sequential {
                    children: children
                        .iter()
                        .enumerate()
                        .map(|(i, child)| Self::build_node(child, me.clone(), Position::Child(i)))
                        .collect(),
                },
                TaskDef::Parallel { subtask, .. } => TaskKind::Parallel {
                    subtask: Self::build_node(subtask, me.clone(), Position::Subtask),
                },
            };

            Task {
                name: def.name().to_string(),
                position,
                parent,
                kind,
                status: Mutex::new(TaskStatus::Idle),
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn parent(&self) -> Option<Arc<Task>> {
        self.parent.upgrade()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, TaskKind::Leaf)
    }

    /// Plantilla compartida por todas las unidades de trabajo de un job paralelo.
    pub fn subtask(&self) -> Option<&Arc<Task>> {
        match &self.kind {
            TaskKind::Parallel { subtask } => Some(subtask),
            _ => None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: TaskStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Segmento con el que este nodo aparece en una clave.
    fn segment(&self) -> String {
        match self.position {
            Position::Root => self.name.clone(),
            Position::Child(i) => i.to_string(),
            Position::Subtask => SUBTASK_SEGMENT.to_string(),
        }
    }

    /// Clave punteada: "Raiz", "Raiz.2", "Raiz.subtask", "Raiz.1.subtask"...
    pub fn get_key(&self) -> String {
        match self.parent.upgrade() {
            Some(parent) => format!("{}.{}", parent.get_key(), self.segment()),
            None => self.segment(),
        }
    }

    /// Busca un nodo a partir de una ruta ya partida en segmentos.
    /// El primer segmento debe nombrar a este nodo.
    pub fn get_subtask(self: &Arc<Self>, path: &[&str]) -> Result<Arc<Task>, TaskNotFoundError> {
        let (first, rest) = path
            .split_first()
            .ok_or_else(|| TaskNotFoundError::new(path))?;

        if self.segment() != *first {
            return Err(TaskNotFoundError::new(path));
        }

        if rest.is_empty() {
            return Ok(self.clone());
        }

        match &self.kind {
            TaskKind::Leaf => Err(TaskNotFoundError::new(path)),
            TaskKind::Sequential { children } => {
                let index: usize = rest[0]
                    .parse()
                    .map_err(|_| TaskNotFoundError::new(path))?;
                let child = children
                    .get(index)
                    .ok_or_else(|| TaskNotFoundError::new(path))?;
                child.get_subtask(rest)
            }
            TaskKind::Parallel { subtask } => subtask.get_subtask(rest),
        }
    }

    /// Igual que `get_subtask` pero recibiendo la clave completa.
    pub fn find(self: &Arc<Self>, key: &str) -> Result<Arc<Task>, TaskNotFoundError> {
        let path: Vec<&str> = key.split('.').collect();
        self.get_subtask(&path).map_err(|_| TaskNotFoundError {
            path: key.to_string(),
        })
    }

    /// Todos los nodos del árbol en preorden.
    pub fn walk(self: &Arc<Self>) -> Vec<Arc<Task>> {
        let mut out = vec![self.clone()];
        match &self.kind {
            TaskKind::Leaf => {}
            TaskKind::Sequential { children } => {
                for child in children {
                    out.extend(child.walk());
                }
            }
            TaskKind::Parallel { subtask } => out.extend(subtask.walk()),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Arc<Task> {
        Task::build(&TaskDef::sequential(
            "TestContainerTask",
            vec![
                TaskDef::leaf("TestTask"),
                TaskDef::leaf("TestTask"),
                TaskDef::parallel("TestParallelTask", TaskDef::leaf("TestTask")),
            ],
        ))
    }

    fn parallel() -> Arc<Task> {
        Task::build(&TaskDef::parallel("TestParallelTask", TaskDef::leaf("TestTask")))
    }

    #[test]
    fn key_of_root_is_its_name() {
        let leaf = Task::build(&TaskDef::leaf("TestTask"));
        assert_eq!(leaf.get_key(), "TestTask");
        assert_eq!(container().get_key(), "TestContainerTask");
        assert_eq!(parallel().get_key(), "TestParallelTask");
    }

    #[test]
    fn container_children_are_keyed_by_position() {
        let root = container();
        let TaskKind::Sequential { children } = root.kind() else {
            panic!("esperaba un contenedor");
        };
        for (i, child) in children.iter().enumerate() {
            assert_eq!(child.get_key(), format!("TestContainerTask.{}", i));
        }
    }

    #[test]
    fn parallel_child_uses_fixed_segment() {
        let root = parallel();
        let sub = root.subtask().unwrap();
        assert_eq!(sub.get_key(), "TestParallelTask.subtask");

        let nested = container();
        let found = nested.find("TestContainerTask.2.subtask").unwrap();
        assert_eq!(found.name(), "TestTask");
        assert_eq!(found.get_key(), "TestContainerTask.2.subtask");
    }

    #[test]
    fn every_node_round_trips_through_its_key() {
        let root = container();
        for node in root.walk() {
            let found = root.find(&node.get_key()).unwrap();
            assert!(Arc::ptr_eq(&found, &node), "falló para {}", node.get_key());
        }
        assert_eq!(root.walk().len(), 5);
    }

    #[test]
    fn unknown_leading_segment_is_not_found() {
        let leaf = Task::build(&TaskDef::leaf("TestTask"));
        assert!(leaf.find("FakeTaskThatDoesNotExist").is_err());
        assert!(container().find("FakeTaskThatDoesNotExist").is_err());
        assert!(parallel().find("FakeTaskThatDoesNotExist").is_err());
    }

    #[test]
    fn bad_container_index_is_not_found() {
        let root = container();
        let err = root.find("TestContainerTask.10").unwrap_err();
        assert_eq!(err.path, "TestContainerTask.10");
        assert!(root.find("TestContainerTask.FakeTaskThatIsntAnInteger").is_err());
        assert!(root.find("TestContainerTask.-1").is_err());
    }

    #[test]
    fn parallel_child_must_use_subtask_segment() {
        let root = parallel();
        assert!(root.find("TestParallelTask.FakeTaskThatDoesNotExist").is_err());
        assert!(root.find("TestParallelTask.subtask.extra").is_err());
    }

    #[test]
    fn empty_path_is_not_found() {
        let root = parallel();
        assert!(root.get_subtask(&[]).is_err());
    }

    #[test]
    fn status_starts_idle_and_can_change() {
        let root = parallel();
        assert_eq!(root.status(), TaskStatus::Idle);
        root.set_status(TaskStatus::Running);
        assert_eq!(root.status(), TaskStatus::Running);
        assert_eq!(root.subtask().unwrap().status(), TaskStatus::Idle);
    }

    #[test]
    fn parent_link_points_back_without_owning() {
        let root = parallel();
        let sub = root.subtask().unwrap().clone();
        assert!(Arc::ptr_eq(&sub.parent().unwrap(), &root));
        assert_eq!(sub.position(), Position::Subtask);

        drop(root);
        assert!(sub.parent().is_none());
    }

    #[test]
    fn task_def_reads_from_json() {
        let raw = r#"{
            "kind": "parallel",
            "name": "WordCount",
            "subtask": { "kind": "leaf", "name": "CountWords" }
        }"#;
        let def: TaskDef = serde_json::from_str(raw).unwrap();
        assert_eq!(def, TaskDef::parallel("WordCount", TaskDef::leaf("CountWords")));
    }
}
