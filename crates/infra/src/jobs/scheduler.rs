//! Job registry and dependency-ordered execution plan.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use cronq_core::{Dependent, Job, JobError, JobKind};

use super::services::JobServices;

/// Holds the registered jobs of one process and resolves their order.
///
/// Registration order is preserved for iteration and seeds the ready queue:
/// jobs with no dependencies run in the order they were added, and a job
/// unblocked later joins the back of the queue.
#[derive(Debug)]
pub struct Scheduler {
    services: Arc<JobServices>,
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new(services: Arc<JobServices>) -> Self {
        Self {
            services,
            jobs: Vec::new(),
        }
    }

    /// Register a job of `kind` with `payload`.
    pub fn add_job(&mut self, kind: JobKind, payload: JsonValue) -> Result<&Job, JobError> {
        self.add(Job::new(kind, payload))
    }

    /// Register a fully configured job.
    ///
    /// Fails with `InvalidJob` if the kind has no handler, the payload does
    /// not conform, or another job already uses the same name.
    pub fn add(&mut self, job: Job) -> Result<&Job, JobError> {
        self.services.registry().validate(&job)?;

        let name = job.name();
        if self.find_job_by_name(&name).is_some() {
            return Err(JobError::invalid_job(format!("duplicate job name `{name}`")));
        }

        debug!(job = %name, kind = %job.kind(), "job registered");
        self.jobs.push(job);
        let idx = self.jobs.len() - 1;
        Ok(&self.jobs[idx])
    }

    pub fn find_job_by_name(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name() == name)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn clear_jobs(&mut self) {
        self.jobs.clear();
    }

    /// Jobs in an order where every dependency precedes its dependents.
    ///
    /// Kahn's algorithm over the `depends_on` edges, with a FIFO ready queue.
    pub fn execution_order(&self) -> Result<Vec<Job>, JobError> {
        let names: Vec<String> = self.jobs.iter().map(Job::name).collect();
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let n = self.jobs.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, job) in self.jobs.iter().enumerate() {
            for dependency in job.dependencies() {
                let &d = index.get(dependency.as_str()).ok_or_else(|| {
                    JobError::MissingDependency {
                        job: names[i].clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }

        let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &d in &dependents[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    ready.push_back(d);
                }
            }
        }

        if order.len() < n {
            let jobs = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| names[i].clone())
                .collect();
            return Err(JobError::CircularDependency { jobs });
        }

        Ok(order.into_iter().map(|i| self.jobs[i].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronq_core::RunnerConfig;
    use proptest::prelude::*;
    use serde_json::json;

    fn scheduler() -> Scheduler {
        Scheduler::new(JobServices::builder(RunnerConfig::default()).build())
    }

    fn job(name: &str) -> Job {
        Job::new(JobKind::Shell, json!({"command": "true"})).with_name(name)
    }

    fn names(jobs: &[Job]) -> Vec<String> {
        jobs.iter().map(Job::name).collect()
    }

    #[test]
    fn dependencies_precede_dependents() {
        let mut s = scheduler();
        s.add(job("c").depends_on("a").depends_on("b")).unwrap();
        s.add(job("b").depends_on("a")).unwrap();
        s.add(job("a")).unwrap();

        assert_eq!(names(&s.execution_order().unwrap()), ["a", "b", "c"]);
        // Iteration keeps registration order.
        assert_eq!(names(s.jobs()), ["c", "b", "a"]);
    }

    #[test]
    fn ties_break_by_registration_order() {
        let mut s = scheduler();
        s.add(job("z")).unwrap();
        s.add(job("y")).unwrap();
        s.add(job("x").depends_on("z")).unwrap();
        s.add(job("w")).unwrap();

        // `x` is unblocked by `z` after `w` is already queued.
        assert_eq!(names(&s.execution_order().unwrap()), ["z", "y", "w", "x"]);
    }

    #[test]
    fn unblocked_jobs_join_the_back_of_the_queue() {
        let mut s = scheduler();
        s.add(job("load").depends_on("extract")).unwrap();
        s.add(job("extract")).unwrap();
        s.add(job("audit")).unwrap();
        s.add(job("notify").depends_on("load")).unwrap();
        s.add(job("cleanup")).unwrap();

        assert_eq!(
            names(&s.execution_order().unwrap()),
            ["extract", "audit", "cleanup", "load", "notify"]
        );
    }

    #[test]
    fn missing_dependency_is_fatal() {
        let mut s = scheduler();
        s.add(job("report").depends_on("extract")).unwrap();

        assert_eq!(
            s.execution_order().unwrap_err(),
            JobError::MissingDependency {
                job: "report".into(),
                dependency: "extract".into()
            }
        );
    }

    #[test]
    fn cycle_is_reported_with_members() {
        let mut s = scheduler();
        s.add(job("root")).unwrap();
        s.add(job("a").depends_on("b")).unwrap();
        s.add(job("b").depends_on("a")).unwrap();

        let err = s.execution_order().unwrap_err();
        assert_eq!(
            err,
            JobError::CircularDependency {
                jobs: vec!["a".into(), "b".into()]
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut s = scheduler();
        s.add(job("loop").depends_on("loop")).unwrap();
        assert!(matches!(
            s.execution_order(),
            Err(JobError::CircularDependency { .. })
        ));
    }

    #[test]
    fn add_job_validates_kind_and_payload() {
        let mut s = scheduler();
        let name = s.add_job(JobKind::Shell, json!({"command": "ls"})).unwrap().name();
        assert!(name.starts_with("shell:"));
        assert!(s.find_job_by_name(&name).is_some());

        assert!(matches!(
            s.add_job(JobKind::Url, json!({"url": "ftp://nope"})),
            Err(JobError::InvalidJob(_))
        ));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut s = scheduler();
        s.add(job("dup")).unwrap();
        assert!(matches!(s.add(job("dup")), Err(JobError::InvalidJob(_))));

        s.add_job(JobKind::Shell, json!({"command": "ls"})).unwrap();
        assert!(s.add_job(JobKind::Shell, json!({"command": "ls"})).is_err());
    }

    #[test]
    fn clear_removes_everything() {
        let mut s = scheduler();
        s.add(job("a")).unwrap();
        s.clear_jobs();
        assert!(s.is_empty());
        assert!(s.execution_order().unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn acyclic_graphs_yield_valid_permutations(
            edges in proptest::collection::vec(proptest::collection::vec(any::<bool>(), 16), 1..16)
        ) {
            let n = edges.len();
            let mut s = scheduler();
            // Register in reverse so order never falls out of insertion order.
            for i in (0..n).rev() {
                let mut j = job(&format!("j{i}"));
                for (d, &edge) in edges[i].iter().enumerate().take(i) {
                    if edge {
                        j = j.depends_on(format!("j{d}"));
                    }
                }
                s.add(j).unwrap();
            }

            let order = names(&s.execution_order().unwrap());
            prop_assert_eq!(order.len(), n);
            let position: HashMap<&str, usize> =
                order.iter().enumerate().map(|(p, name)| (name.as_str(), p)).collect();
            prop_assert_eq!(position.len(), n);

            for i in 0..n {
                for d in 0..i {
                    if edges[i][d] {
                        let dependency = position[format!("j{d}").as_str()];
                        let dependent = position[format!("j{i}").as_str()];
                        prop_assert!(dependency < dependent);
                    }
                }
            }
        }

        #[test]
        fn any_cycle_is_rejected(cycle_len in 1usize..8, extra in 0usize..8) {
            let mut s = scheduler();
            for i in 0..extra {
                s.add(job(&format!("free{i}"))).unwrap();
            }
            for i in 0..cycle_len {
                let next = (i + 1) % cycle_len;
                s.add(job(&format!("c{i}")).depends_on(format!("c{next}"))).unwrap();
            }

            let is_cycle = matches!(
                s.execution_order(),
                Err(JobError::CircularDependency { .. })
            );
            prop_assert!(is_cycle);
        }
    }
}
