//! Pipeline inspector and constraint analyzer.
//!
//! Read-only diagnostics over the registry. Nothing here runs a handler or a
//! middleware; middleware factories are invoked only to read instance-resolved
//! orders. Constraint decisions go through the same evaluation `publish` uses,
//! so an analysis of a shape matches what dispatch does for it.
//!
//! The one deliberate difference: a custom constraint that fails to evaluate
//! makes the inspector return [`ConstraintEvaluationError`], while dispatch
//! leaves that middleware out and carries on.

use crate::notification::{Verdict, evaluate_constraint};
use crate::pipeline::PipelineKind;
use crate::registry::{DEFAULT_ORDER, MiddlewareDescriptor, NotificationShapeInfo, Registry};
use courier_core::capability::{CapabilityConstraint, CapabilitySet};
use courier_core::error::{ConstraintEvaluationError, InspectionError};
use courier_core::notification::Notification;
use courier_core::request::{Request, StreamRequest};
use courier_core::resolution::ResolutionContext;
use courier_core::shape::Shape;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A middleware registration as recorded.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredMiddleware {
    /// Middleware type name
    pub name: &'static str,
    /// Pipeline it belongs to
    pub pipeline: PipelineKind,
    /// Order given at registration
    pub static_order: Option<i32>,
    /// Rendered capability constraint
    pub constraint: String,
    /// Registration sequence
    pub sequence: u64,
}

/// A middleware registration with its order resolved.
#[derive(Debug, Clone, Serialize)]
pub struct MiddlewareDescription {
    /// Middleware type name
    pub name: &'static str,
    /// Pipeline it belongs to
    pub pipeline: PipelineKind,
    /// Order the middleware would actually run at
    pub resolved_order: i32,
    /// Order given at registration
    pub static_order: Option<i32>,
    /// Rendered capability constraint
    pub constraint: String,
    /// Debug summary of the configuration payload
    pub configuration: Option<String>,
    /// Registration sequence
    pub sequence: u64,
}

/// One middleware's constraint decision.
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintDecision {
    /// Middleware type name
    pub middleware: &'static str,
    /// Resolved order
    pub order: i32,
    /// Rendered constraint
    pub constraint: String,
    /// Why it applies or is skipped
    pub reason: String,
}

/// Constraint analysis of one notification shape.
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintAnalysis {
    /// Analyzed shape
    pub shape: Shape,
    /// Capabilities evaluated against
    pub capabilities: Vec<&'static str>,
    /// Middleware that would run, in execution order
    pub applicable: Vec<ConstraintDecision>,
    /// Middleware that would be left out, in registration order
    pub skipped: Vec<ConstraintDecision>,
    /// Applicable / total notification middleware; 1.0 with none registered
    pub efficiency_ratio: f64,
}

/// One step of a predicted notification pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    /// Middleware type name
    pub middleware: &'static str,
    /// Whether publish would run it
    pub will_execute: bool,
    /// Why
    pub reason: String,
    /// Resolved order
    pub estimated_order: i32,
}

/// Predicted pipeline for one notification value.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPath {
    /// Notification shape
    pub shape: Shape,
    /// Instance capabilities
    pub capabilities: Vec<&'static str>,
    /// Every notification middleware, ordered by resolved order
    pub steps: Vec<ExecutionStep>,
    /// Automatic handlers the fan-out would reach
    pub handlers: Vec<&'static str>,
}

impl ExecutionPath {
    /// Steps that would run.
    pub fn executing(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter().filter(|step| step.will_execute)
    }
}

/// Registry-wide view of notification middleware constraints.
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintReport {
    /// Notification middleware registrations
    pub total_middleware: usize,
    /// Unconstrained ones
    pub general_middleware: usize,
    /// Constrained ones
    pub constrained_middleware: usize,
    /// Capability categories referenced by constraints
    pub categories: Vec<&'static str>,
    /// Number of constraints referencing each category
    pub category_usage: BTreeMap<&'static str, usize>,
    /// Registered notification shapes
    pub notification_shapes: usize,
    /// Optimization hints
    pub hints: Vec<String>,
}

/// Summary of a registered notification shape.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationShapeSummary {
    /// The shape
    pub shape: Shape,
    /// Declared capabilities
    pub capabilities: Vec<&'static str>,
    /// Automatic handlers
    pub handlers: Vec<&'static str>,
}

fn reason(constraint: &CapabilityConstraint, applies: bool) -> String {
    match (constraint.is_general(), applies) {
        (true, _) => "general middleware (no capability constraint)".to_string(),
        (false, true) => format!("constraint satisfied: {constraint}"),
        (false, false) => format!("constraint not satisfied: {constraint}"),
    }
}

struct Planned<'a> {
    descriptor: &'a MiddlewareDescriptor,
    applies: bool,
    order: i32,
}

/// Read-only diagnostics over a [`Registry`].
#[derive(Debug, Clone)]
pub struct PipelineInspector {
    registry: Arc<Registry>,
}

impl PipelineInspector {
    /// Inspector over `registry`.
    #[must_use]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Every middleware registration, in registration order.
    #[must_use]
    pub fn list_registered_middleware(&self) -> Vec<RegisteredMiddleware> {
        self.registry
            .catalog()
            .iter()
            .map(|descriptor| RegisteredMiddleware {
                name: descriptor.name,
                pipeline: descriptor.pipeline,
                static_order: descriptor.static_order,
                constraint: descriptor.constraint.to_string(),
                sequence: descriptor.sequence,
            })
            .collect()
    }

    /// Every middleware with its order resolved through `context`, sorted by
    /// resolved order then registration sequence.
    ///
    /// # Errors
    ///
    /// [`InspectionError::Resolution`] if a middleware factory fails.
    pub fn describe_middleware(
        &self,
        context: &dyn ResolutionContext,
    ) -> Result<Vec<MiddlewareDescription>, InspectionError> {
        self.describe_where(context, |_| true)
    }

    /// The middleware of request shape `R`'s pipeline, in execution order.
    ///
    /// # Errors
    ///
    /// [`InspectionError::Resolution`] if a middleware factory fails.
    pub fn describe_request_pipeline<R: Request>(
        &self,
        context: &dyn ResolutionContext,
    ) -> Result<Vec<MiddlewareDescription>, InspectionError> {
        let pipeline = PipelineKind::Request(Shape::of::<R>());
        self.describe_where(context, |descriptor| descriptor.pipeline == pipeline)
    }

    /// The middleware of stream shape `R`'s pipeline, in execution order.
    ///
    /// # Errors
    ///
    /// [`InspectionError::Resolution`] if a middleware factory fails.
    pub fn describe_stream_pipeline<R: StreamRequest>(
        &self,
        context: &dyn ResolutionContext,
    ) -> Result<Vec<MiddlewareDescription>, InspectionError> {
        let pipeline = PipelineKind::Stream(Shape::of::<R>());
        self.describe_where(context, |descriptor| descriptor.pipeline == pipeline)
    }

    fn describe_where(
        &self,
        context: &dyn ResolutionContext,
        include: impl Fn(&MiddlewareDescriptor) -> bool,
    ) -> Result<Vec<MiddlewareDescription>, InspectionError> {
        let mut descriptions = self
            .registry
            .catalog()
            .iter()
            .filter(|descriptor| include(descriptor))
            .map(|descriptor| -> Result<MiddlewareDescription, InspectionError> {
                Ok(MiddlewareDescription {
                    name: descriptor.name,
                    pipeline: descriptor.pipeline,
                    resolved_order: descriptor.resolve_order(context)?,
                    static_order: descriptor.static_order,
                    constraint: descriptor.constraint.to_string(),
                    configuration: descriptor
                        .configuration
                        .as_ref()
                        .map(|configuration| configuration.summary().to_string()),
                    sequence: descriptor.sequence,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        descriptions.sort_by_key(|description| (description.resolved_order, description.sequence));
        Ok(descriptions)
    }

    /// Which notification middleware a publish of shape `N` would run.
    ///
    /// Evaluates against `N`'s statically declared capabilities; use
    /// [`analyze_execution_path`](Self::analyze_execution_path) when a value
    /// declares more.
    ///
    /// # Errors
    ///
    /// [`InspectionError::Constraint`] if a custom constraint fails, or
    /// [`InspectionError::Resolution`] if an applicable middleware cannot be built.
    pub fn analyze_constraints<N: Notification>(
        &self,
        context: &dyn ResolutionContext,
    ) -> Result<ConstraintAnalysis, InspectionError> {
        self.analyze(Shape::of::<N>(), &N::capabilities(), context)
    }

    /// [`analyze_constraints`](Self::analyze_constraints) for a shape known only at runtime.
    ///
    /// # Errors
    ///
    /// As [`analyze_constraints`](Self::analyze_constraints).
    pub fn analyze_shape(
        &self,
        info: &NotificationShapeInfo,
        context: &dyn ResolutionContext,
    ) -> Result<ConstraintAnalysis, InspectionError> {
        self.analyze(info.shape(), info.capabilities(), context)
    }

    fn analyze(
        &self,
        shape: Shape,
        capabilities: &CapabilitySet,
        context: &dyn ResolutionContext,
    ) -> Result<ConstraintAnalysis, InspectionError> {
        let planned = self.plan(shape, capabilities, context)?;
        let total = planned.len();

        let decision = |step: &Planned<'_>| ConstraintDecision {
            middleware: step.descriptor.name,
            order: step.order,
            constraint: step.descriptor.constraint.to_string(),
            reason: reason(&step.descriptor.constraint, step.applies),
        };
        let mut skipped: Vec<&Planned<'_>> = planned.iter().filter(|step| !step.applies).collect();
        skipped.sort_by_key(|step| step.descriptor.sequence);
        let applicable: Vec<ConstraintDecision> =
            planned.iter().filter(|step| step.applies).map(decision).collect();

        #[allow(clippy::cast_precision_loss)]
        let efficiency_ratio = if total == 0 {
            1.0
        } else {
            applicable.len() as f64 / total as f64
        };

        Ok(ConstraintAnalysis {
            shape,
            capabilities: capabilities.names(),
            applicable,
            skipped: skipped.into_iter().map(decision).collect(),
            efficiency_ratio,
        })
    }

    /// Predicted notification pipeline for one value, using the value's own
    /// capabilities.
    ///
    /// # Errors
    ///
    /// As [`analyze_constraints`](Self::analyze_constraints).
    pub fn analyze_execution_path<N: Notification>(
        &self,
        notification: &N,
        context: &dyn ResolutionContext,
    ) -> Result<ExecutionPath, InspectionError> {
        let shape = Shape::of::<N>();
        let capabilities = notification.instance_capabilities();
        let steps = self
            .plan(shape, &capabilities, context)?
            .into_iter()
            .map(|step| ExecutionStep {
                middleware: step.descriptor.name,
                will_execute: step.applies,
                reason: reason(&step.descriptor.constraint, step.applies),
                estimated_order: step.order,
            })
            .collect();
        Ok(ExecutionPath {
            shape,
            capabilities: capabilities.names(),
            steps,
            handlers: self.registry.handler_names(shape).to_vec(),
        })
    }

    /// Evaluate every notification middleware against `capabilities`, sorted
    /// by resolved order then sequence.
    fn plan<'a>(
        &'a self,
        shape: Shape,
        capabilities: &CapabilitySet,
        context: &dyn ResolutionContext,
    ) -> Result<Vec<Planned<'a>>, InspectionError> {
        let mut planned = Vec::new();
        for descriptor in self.notification_descriptors() {
            let applies = match evaluate_constraint(&descriptor.constraint, capabilities) {
                Verdict::Applies => true,
                Verdict::NotSatisfied => false,
                Verdict::EvaluationFailed(source) => {
                    return Err(ConstraintEvaluationError {
                        middleware: descriptor.name,
                        constraint: descriptor.constraint.to_string(),
                        shape,
                        source,
                    }
                    .into());
                }
            };
            // Dispatch never builds skipped middleware, so their order falls back
            // to the registered one if the factory fails.
            let order = if applies {
                descriptor.resolve_order(context)?
            } else {
                descriptor
                    .resolve_order(context)
                    .unwrap_or_else(|_| descriptor.static_order.unwrap_or(DEFAULT_ORDER))
            };
            planned.push(Planned {
                descriptor,
                applies,
                order,
            });
        }
        planned.sort_by_key(|step| (step.order, step.descriptor.sequence));
        Ok(planned)
    }

    fn notification_descriptors(&self) -> impl Iterator<Item = &MiddlewareDescriptor> {
        self.registry
            .catalog()
            .iter()
            .filter(|descriptor| descriptor.pipeline == PipelineKind::Notification)
    }

    /// Counts, categories and hints across all notification middleware.
    #[must_use]
    pub fn pipeline_constraint_report(&self) -> ConstraintReport {
        let descriptors: Vec<&MiddlewareDescriptor> = self.notification_descriptors().collect();
        let shapes = self.registry.notification_shapes();

        let general = descriptors.iter().filter(|d| d.constraint.is_general()).count();
        let mut category_usage: BTreeMap<&'static str, usize> = BTreeMap::new();
        for descriptor in &descriptors {
            let categories: BTreeSet<&'static str> = descriptor.constraint.categories().into_iter().collect();
            for category in categories {
                *category_usage.entry(category).or_insert(0) += 1;
            }
        }

        let mut hints = Vec::new();
        if !descriptors.is_empty() && general == descriptors.len() {
            hints.push(
                "No notification middleware is constrained; every middleware runs for every notification"
                    .to_string(),
            );
        }
        let declared: BTreeSet<&'static str> = shapes
            .iter()
            .flat_map(|info| info.capabilities().names())
            .collect();
        for category in category_usage.keys() {
            if !declared.contains(category) {
                hints.push(format!(
                    "Capability '{category}' is required by middleware but declared by no registered notification shape"
                ));
            }
        }
        for descriptor in descriptors.iter().filter(|d| !d.constraint.is_general()) {
            let reaches_any = shapes.iter().any(|info| {
                matches!(
                    evaluate_constraint(&descriptor.constraint, info.capabilities()),
                    Verdict::Applies
                )
            });
            if !shapes.is_empty() && !reaches_any {
                hints.push(format!(
                    "Middleware '{}' applies to no registered notification shape",
                    descriptor.name
                ));
            }
        }

        ConstraintReport {
            total_middleware: descriptors.len(),
            general_middleware: general,
            constrained_middleware: descriptors.len() - general,
            categories: category_usage.keys().copied().collect(),
            category_usage,
            notification_shapes: shapes.len(),
            hints,
        }
    }

    /// Notification shapes known to the registry.
    #[must_use]
    pub fn registered_notification_shapes(&self) -> Vec<NotificationShapeSummary> {
        self.registry
            .notification_shapes()
            .iter()
            .map(|info| NotificationShapeSummary {
                shape: info.shape(),
                capabilities: info.capabilities().names(),
                handlers: self.registry.handler_names(info.shape()).to_vec(),
            })
            .collect()
    }
}
