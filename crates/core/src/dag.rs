//! 工作流DAG
//!
//! 节点在构建时一次性建立索引（节点数组 + 邻接表），之后只读，可在线程间共享。

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{SchedulerError, SchedulerResult};

/// DAG节点需要提供自身ID以及子节点ID
pub trait DagNode {
    fn id(&self) -> &str;
    fn children(&self) -> &[String];
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitStatus {
    Unvisited,
    Visiting,
    Visited,
}

/// 有向无环图
#[derive(Debug, Clone)]
pub struct Dag<T> {
    nodes: Vec<T>,
    index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
    parents: Vec<Vec<usize>>,
    origins: Vec<usize>,
    leaves: Vec<usize>,
}

impl<T: DagNode> Dag<T> {
    /// 构建DAG，校验子节点存在性、无环，并要求至少有一个根节点和一个叶子节点
    pub fn build(nodes: Vec<T>) -> SchedulerResult<Self> {
        if nodes.is_empty() {
            return Err(SchedulerError::Validation("DAG节点不能为空".to_string()));
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id().to_string(), i).is_some() {
                return Err(SchedulerError::Validation(format!(
                    "DAG节点ID重复: {}",
                    node.id()
                )));
            }
        }

        let mut children = vec![Vec::new(); nodes.len()];
        let mut parents = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for child_id in node.children() {
                let child = *index.get(child_id.as_str()).ok_or_else(|| {
                    SchedulerError::DanglingReference {
                        node_id: node.id().to_string(),
                        child_id: child_id.clone(),
                    }
                })?;
                if !children[i].contains(&child) {
                    children[i].push(child);
                    parents[child].push(i);
                }
            }
        }

        Self::check_acyclic(&nodes, &children)?;

        let origins: Vec<usize> = (0..nodes.len()).filter(|&i| parents[i].is_empty()).collect();
        let leaves: Vec<usize> = (0..nodes.len()).filter(|&i| children[i].is_empty()).collect();
        if origins.is_empty() {
            return Err(SchedulerError::Validation("DAG没有根节点".to_string()));
        }
        if leaves.is_empty() {
            return Err(SchedulerError::Validation("DAG没有叶子节点".to_string()));
        }

        Ok(Self {
            nodes,
            index,
            children,
            parents,
            origins,
            leaves,
        })
    }

    /// 三色深度优先遍历，遇到访问中的节点即成环
    fn check_acyclic(nodes: &[T], children: &[Vec<usize>]) -> SchedulerResult<()> {
        let mut status = vec![VisitStatus::Unvisited; nodes.len()];

        for start in 0..nodes.len() {
            if status[start] != VisitStatus::Unvisited {
                continue;
            }
            status[start] = VisitStatus::Visiting;
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

            while let Some(frame) = stack.last_mut() {
                let (node, next) = *frame;
                if next < children[node].len() {
                    frame.1 += 1;
                    let child = children[node][next];
                    match status[child] {
                        VisitStatus::Visiting => {
                            return Err(SchedulerError::CyclicGraph {
                                node_id: nodes[child].id().to_string(),
                            });
                        }
                        VisitStatus::Unvisited => {
                            status[child] = VisitStatus::Visiting;
                            stack.push((child, 0));
                        }
                        VisitStatus::Visited => {}
                    }
                } else {
                    status[node] = VisitStatus::Visited;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 没有父节点的节点，即初始下发集合
    pub fn origins(&self) -> Vec<&T> {
        self.origins.iter().map(|&i| &self.nodes[i]).collect()
    }

    /// 没有子节点的节点
    pub fn leaves(&self) -> Vec<&T> {
        self.leaves.iter().map(|&i| &self.nodes[i]).collect()
    }

    pub fn is_leaf(&self, id: &str) -> bool {
        self.index
            .get(id)
            .map(|&i| self.children[i].is_empty())
            .unwrap_or(false)
    }

    pub fn successors(&self, id: &str) -> Vec<&T> {
        self.related(id, &self.children)
    }

    pub fn predecessors(&self, id: &str) -> Vec<&T> {
        self.related(id, &self.parents)
    }

    fn related(&self, id: &str, adjacency: &[Vec<usize>]) -> Vec<&T> {
        match self.index.get(id) {
            Some(&i) => adjacency[i].iter().map(|&j| &self.nodes[j]).collect(),
            None => Vec::new(),
        }
    }
}

impl<T: Serialize> Serialize for Dag<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.nodes.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Dag<T>
where
    T: DagNode + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nodes = Vec::<T>::deserialize(deserializer)?;
        Dag::build(nodes).map_err(serde::de::Error::custom)
    }
}
