use crate::directions::Step;
use serde::Serialize;

/// Bounded cursor over a fixed list of maneuver steps.
///
/// An empty step list means no active navigation; `current` then yields `None`.
#[derive(Debug, Clone, Default)]
pub struct NavigationStepper {
    steps: Vec<Step>,
    current: usize,
}

impl NavigationStepper {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, current: 0 }
    }

    pub fn reset(&mut self, steps: Vec<Step>) {
        self.steps = steps;
        self.current = 0;
    }

    /// Moves to the next step. Returns false (and stays put) on the last step.
    pub fn advance(&mut self) -> bool {
        if self.current + 1 < self.steps.len() {
            self.current += 1;
            true
        } else {
            false
        }
    }

    /// Moves to the previous step. Returns false (and stays put) on the first step.
    pub fn retreat(&mut self) -> bool {
        if self.current > 0 {
            self.current -= 1;
            true
        } else {
            false
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        (!self.steps.is_empty()).then_some(self.current)
    }

    pub fn current(&self) -> Option<&Step> {
        self.steps.get(self.current)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_last(&self) -> bool {
        !self.steps.is_empty() && self.current + 1 == self.steps.len()
    }

    pub fn view(&self) -> StepperView {
        StepperView {
            active: !self.is_empty(),
            current_index: self.current_index(),
            total_steps: self.len(),
            is_last: self.is_last(),
            current_step: self.current().cloned(),
            steps: self.steps.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepperView {
    pub active: bool,
    pub current_index: Option<usize>,
    pub total_steps: usize,
    pub is_last: bool,
    pub current_step: Option<Step>,
    pub steps: Vec<Step>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directions::Maneuver;

    fn steps(n: usize) -> Vec<Step> {
        (0..n)
            .map(|i| Step {
                maneuver: Maneuver::Continue,
                instruction: format!("step {i}"),
                distance_m: 100.0,
                duration_secs: 30,
            })
            .collect()
    }

    #[test]
    fn test_retreat_at_start_is_noop() {
        let mut stepper = NavigationStepper::new(steps(3));
        assert!(!stepper.retreat());
        assert!(!stepper.retreat());
        assert_eq!(stepper.current_index(), Some(0));
    }

    #[test]
    fn test_advance_stops_at_last_step() {
        let mut stepper = NavigationStepper::new(steps(3));
        assert!(stepper.advance());
        assert!(stepper.advance());
        assert!(stepper.is_last());
        assert!(!stepper.advance());
        assert_eq!(stepper.current_index(), Some(2));
        assert_eq!(stepper.current().unwrap().instruction, "step 2");

        assert!(stepper.retreat());
        assert_eq!(stepper.current_index(), Some(1));
    }

    #[test]
    fn test_reset_returns_to_first_step() {
        let mut stepper = NavigationStepper::new(steps(4));
        stepper.advance();
        stepper.advance();
        stepper.reset(steps(2));
        assert_eq!(stepper.current_index(), Some(0));
        assert_eq!(stepper.len(), 2);
    }

    #[test]
    fn test_empty_means_no_navigation() {
        let mut stepper = NavigationStepper::default();
        assert!(!stepper.advance());
        assert!(!stepper.retreat());
        assert_eq!(stepper.current_index(), None);
        assert!(stepper.current().is_none());
        assert!(!stepper.is_last());

        let view = stepper.view();
        assert!(!view.active);
        assert_eq!(view.total_steps, 0);
    }

    #[test]
    fn test_single_step_is_both_first_and_last() {
        let mut stepper = NavigationStepper::new(steps(1));
        assert!(!stepper.advance());
        assert!(!stepper.retreat());
        assert!(stepper.is_last());
        assert_eq!(stepper.current_index(), Some(0));
    }
}
