mod common;

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use scheduler_core::*;
    use scheduler_testing_utils::*;

    use crate::common::Harness;

    fn a_to_b(a: JobInfoBuilder, b: JobInfoBuilder) -> PlanInfo {
        PlanInfoBuilder::new("flow")
            .workflow(vec![a.with_children(&["b"]).build(), b.build()])
            .build()
    }

    #[tokio::test]
    async fn test_workflow_advances_to_success() {
        let harness = Harness::online(workers(2)).await;
        harness
            .save(&a_to_b(JobInfoBuilder::new("a"), JobInfoBuilder::new("b")))
            .await;

        let instance = harness
            .broker
            .processor()
            .schedule("flow", TriggerType::Schedule, Attributes::new(), Utc::now())
            .await
            .unwrap()
            .expect("计划应被触发");
        let pid = instance.plan_instance_id.clone();

        assert_eq!(harness.job_instances_for(&pid, "a").await.len(), 1);
        assert!(harness.job_instances_for(&pid, "b").await.is_empty());

        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.succeed(&a_tasks[0].task_id).await;

        let b_tasks = harness.wait_executing(&pid, "b", 1).await;
        assert_eq!(harness.job_instances_for(&pid, "b").await.len(), 1);
        harness.succeed(&b_tasks[0].task_id).await;

        assert!(harness.wait_plan_status(&pid, PlanStatus::Succeed).await);
        let jobs = harness.job_instances_of(&pid).await;
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Succeed));
    }

    #[tokio::test]
    async fn test_terminating_failure_closes_plan_failed() {
        let harness = Harness::online(workers(1)).await;
        harness
            .save(&a_to_b(
                JobInfoBuilder::new("a").terminate_with_fail(true),
                JobInfoBuilder::new("b"),
            ))
            .await;
        let pid = harness.trigger("flow").await.plan_instance_id;

        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.fail(&a_tasks[0].task_id).await;

        assert!(harness.wait_plan_status(&pid, PlanStatus::Failed).await);
        assert!(harness.job_instances_for(&pid, "b").await.is_empty());
        let a = harness.job_instances_for(&pid, "a").await.pop().unwrap();
        assert_eq!(a.status, JobStatus::Failed);
        assert_eq!(a.error_msg.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_ignorable_failure_still_advances() {
        let harness = Harness::online(workers(1)).await;
        harness
            .save(&a_to_b(
                JobInfoBuilder::new("a").terminate_with_fail(false),
                JobInfoBuilder::new("b"),
            ))
            .await;
        let pid = harness.trigger("flow").await.plan_instance_id;

        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.fail(&a_tasks[0].task_id).await;

        let b_tasks = harness.wait_executing(&pid, "b", 1).await;
        harness.succeed(&b_tasks[0].task_id).await;
        assert!(harness.wait_plan_status(&pid, PlanStatus::Succeed).await);
    }

    #[tokio::test]
    async fn test_duplicate_success_advances_once() {
        let harness = Harness::online(workers(1)).await;
        harness
            .save(&a_to_b(JobInfoBuilder::new("a"), JobInfoBuilder::new("b")))
            .await;
        let pid = harness.trigger("flow").await.plan_instance_id;

        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.succeed(&a_tasks[0].task_id).await;
        harness.succeed(&a_tasks[0].task_id).await;

        harness.wait_executing(&pid, "b", 1).await;
        assert_eq!(harness.job_instances_for(&pid, "b").await.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_creates_task_per_worker() {
        let harness = Harness::online(workers(3)).await;
        let info = PlanInfoBuilder::new("bcast")
            .single(
                JobInfoBuilder::new("job")
                    .with_type(JobType::Broadcast)
                    .build(),
            )
            .build();
        harness.save(&info).await;
        let pid = harness.trigger("bcast").await.plan_instance_id;

        let tasks = harness.wait_executing(&pid, "job", 3).await;
        let mut assigned: Vec<String> = tasks.iter().filter_map(|t| t.worker_id.clone()).collect();
        assigned.sort();
        assert_eq!(assigned, vec!["worker-1", "worker-2", "worker-3"]);

        // 最后一个任务成功才推进
        harness.succeed(&tasks[0].task_id).await;
        harness.succeed(&tasks[1].task_id).await;
        assert_eq!(
            harness.plan_instance(&pid).await.status,
            PlanStatus::Executing
        );
        harness.succeed(&tasks[2].task_id).await;
        assert!(harness.wait_plan_status(&pid, PlanStatus::Succeed).await);
    }

    #[tokio::test]
    async fn test_broadcast_without_workers_fails_job() {
        let harness = Harness::online(Vec::new()).await;
        let info = PlanInfoBuilder::new("bcast")
            .single(
                JobInfoBuilder::new("job")
                    .with_type(JobType::Broadcast)
                    .build(),
            )
            .build();
        harness.save(&info).await;
        let pid = harness.trigger("bcast").await.plan_instance_id;

        let job = harness.job_instances_for(&pid, "job").await.pop().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(harness.plan_instance(&pid).await.status, PlanStatus::Failed);
    }

    #[tokio::test]
    async fn test_map_reduce_phases() {
        let harness = Harness::online(workers(2)).await;
        let info = PlanInfoBuilder::new("wordcount")
            .single(
                JobInfoBuilder::new("job")
                    .with_type(JobType::MapReduce)
                    .build(),
            )
            .build();
        harness.save(&info).await;
        let pid = harness.trigger("wordcount").await.plan_instance_id;

        let split = harness.wait_executing(&pid, "job", 1).await;
        assert_eq!(split[0].task_type, TaskType::Split);
        harness
            .feedback(TaskFeedback {
                map_task_attributes: vec![
                    attributes(&[("shard", json!(0))]),
                    attributes(&[("shard", json!(1))]),
                ],
                ..TaskFeedback::succeed(&split[0].task_id)
            })
            .await;

        let maps = harness.wait_executing(&pid, "job", 2).await;
        assert!(maps.iter().all(|t| t.task_type == TaskType::Map));
        assert!(maps.iter().all(|t| t.map_attributes.is_some()));
        for (i, task) in maps.iter().enumerate() {
            harness
                .feedback(TaskFeedback {
                    result_attributes: attributes(&[("count", json!(i + 1))]),
                    ..TaskFeedback::succeed(&task.task_id)
                })
                .await;
        }

        let reduce = harness.wait_executing(&pid, "job", 1).await;
        assert_eq!(reduce[0].task_type, TaskType::Reduce);
        assert_eq!(reduce[0].reduce_attributes.len(), 2);
        harness.succeed(&reduce[0].task_id).await;

        assert!(harness.wait_plan_status(&pid, PlanStatus::Succeed).await);
    }

    #[tokio::test]
    async fn test_map_without_groups_succeeds_after_split() {
        let harness = Harness::online(workers(1)).await;
        let info = PlanInfoBuilder::new("map")
            .single(JobInfoBuilder::new("job").with_type(JobType::Map).build())
            .build();
        harness.save(&info).await;
        let pid = harness.trigger("map").await.plan_instance_id;

        let split = harness.wait_executing(&pid, "job", 1).await;
        harness.succeed(&split[0].task_id).await;

        assert!(harness.wait_plan_status(&pid, PlanStatus::Succeed).await);
        let job = harness.job_instances_for(&pid, "job").await.pop().unwrap();
        assert_eq!(harness.tasks_of(&job.job_instance_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_creates_new_job_instance() {
        let harness = Harness::online(workers(1)).await;
        let info = PlanInfoBuilder::new("retry")
            .single(JobInfoBuilder::new("job").with_retry(1, 0).build())
            .build();
        harness.save(&info).await;
        let pid = harness.trigger("retry").await.plan_instance_id;

        let first = harness.wait_executing(&pid, "job", 1).await;
        harness.fail(&first[0].task_id).await;

        let second = harness.wait_executing(&pid, "job", 1).await;
        assert_ne!(second[0].task_id, first[0].task_id);
        let attempts = harness.job_instances_for(&pid, "job").await;
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].retry_times, 1);
        assert_eq!(
            harness.plan_instance(&pid).await.status,
            PlanStatus::Executing
        );

        harness.fail(&second[0].task_id).await;
        assert!(harness.wait_plan_status(&pid, PlanStatus::Failed).await);
        assert_eq!(harness.job_instances_for(&pid, "job").await.len(), 2);
    }

    #[tokio::test]
    async fn test_context_flows_to_successor() {
        let harness = Harness::online(workers(1)).await;
        harness
            .save(&a_to_b(
                JobInfoBuilder::new("a"),
                JobInfoBuilder::new("b").with_attribute("batch", json!(10)),
            ))
            .await;
        let pid = harness
            .broker
            .processor()
            .schedule(
                "flow",
                TriggerType::Api,
                attributes(&[("env", json!("prod"))]),
                Utc::now(),
            )
            .await
            .unwrap()
            .unwrap()
            .plan_instance_id;

        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        assert_eq!(a_tasks[0].attributes.get("env"), Some(&json!("prod")));
        harness
            .feedback(TaskFeedback {
                context: attributes(&[("rows", json!(42))]),
                ..TaskFeedback::succeed(&a_tasks[0].task_id)
            })
            .await;

        let b_tasks = harness.wait_executing(&pid, "b", 1).await;
        let b = &b_tasks[0].attributes;
        assert_eq!(b.get("env"), Some(&json!("prod")));
        assert_eq!(b.get("rows"), Some(&json!(42)));
        assert_eq!(b.get("batch"), Some(&json!(10)));
        assert_eq!(
            harness.plan_instance(&pid).await.context.get("rows"),
            Some(&json!(42))
        );
    }

    #[tokio::test]
    async fn test_terminated_feedback_rejected() {
        let harness = Harness::online(workers(1)).await;
        let result = harness
            .broker
            .processor()
            .task_feedback(TaskFeedback {
                result: ExecuteResult::Terminated,
                ..TaskFeedback::succeed("any")
            })
            .await;
        assert!(matches!(result, Err(SchedulerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rejected_everywhere_fails_plan() {
        let harness = Harness::online(workers(3)).await;
        harness.rpc.set_default(RpcReply::Reject);
        harness
            .save(&PlanInfoBuilder::new("p").build())
            .await;
        let pid = harness.trigger("p").await.plan_instance_id;

        assert!(harness.wait_plan_status(&pid, PlanStatus::Failed).await);
        let job = harness.job_instances_for(&pid, "job").await.pop().unwrap();
        let task = harness.tasks_of(&job.job_instance_id).await.pop().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let mut tried = harness.rpc.workers_tried(&task.task_id);
        tried.sort();
        tried.dedup();
        assert_eq!(tried.len(), 3);
    }

    #[tokio::test]
    async fn test_no_capable_worker_fails_plan() {
        let harness = Harness::online(workers(2)).await;
        let info = PlanInfoBuilder::new("p")
            .single(JobInfoBuilder::new("job").with_executor("python").build())
            .build();
        harness.save(&info).await;
        let pid = harness.trigger("p").await.plan_instance_id;

        assert!(harness.wait_plan_status(&pid, PlanStatus::Failed).await);
        assert_eq!(harness.rpc.call_count(), 0);
    }

    #[tokio::test]
    async fn test_task_of_completed_plan_instance_not_dispatched() {
        let harness = Harness::online(workers(1)).await;
        harness
            .save(&a_to_b(
                JobInfoBuilder::new("a").terminate_with_fail(true),
                JobInfoBuilder::new("b"),
            ))
            .await;
        let instance = harness.trigger("flow").await;
        let pid = instance.plan_instance_id.clone();
        let a_tasks = harness.wait_executing(&pid, "a", 1).await;
        harness.fail(&a_tasks[0].task_id).await;
        assert!(harness.wait_plan_status(&pid, PlanStatus::Failed).await);

        // 人为制造一个尚未下发的兄弟任务
        let info = harness.plans.get_info("flow", "v1").await.unwrap().unwrap();
        let b = JobInstance::from_job(
            "ji-late".to_string(),
            &harness.plan_instance(&pid).await,
            info.job("b").unwrap(),
            Attributes::new(),
            Utc::now(),
        );
        harness.job_instances.save(&b).await.unwrap();
        let late = Task::for_job_instance("t-late".to_string(), &b, TaskType::Normal);
        harness.tasks.save_all(&[late]).await.unwrap();
        let calls = harness.rpc.call_count();

        harness.broker.strategy().schedule_task("t-late").await.unwrap();

        let task = harness.tasks.get("t-late").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(harness.rpc.call_count(), calls);
    }
}
