//! Single authorization predicate over (role, action, resource).

use crate::ops::models::Job;
use crate::user::{User, UserRole};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Action {
    CreateJob,
    EditJob,
    CancelJob,
    CompleteJob,
    UpdateTaskStatus,
    ViewJob,
    ManageEquipment,
    ManageUsers,
    ViewAnalytics,
}

/// What the action is aimed at. Actions without a target entity use `None`.
#[derive(Clone, Copy, Debug)]
pub enum Resource<'a> {
    None,
    Job(&'a Job),
}

pub fn is_allowed(actor: &User, action: Action, resource: Resource) -> bool {
    if !actor.is_active {
        return false;
    }
    match actor.role {
        UserRole::Admin => true,
        UserRole::Technician => match action {
            Action::ViewJob | Action::CompleteJob | Action::UpdateTaskStatus => {
                matches!(resource, Resource::Job(job) if job.assigned_to == Some(actor.id))
            }
            _ => false,
        },
        UserRole::SalesAgent => match action {
            Action::CreateJob => true,
            Action::ViewJob | Action::EditJob | Action::CancelJob => {
                matches!(resource, Resource::Job(job) if job.created_by == Some(actor.id))
            }
            _ => false,
        },
    }
}
