//! Incoming task data model : what a caller submits to the plane.

mod private
{
  use serde::{ Deserialize, Serialize };

  /// The logical role of the caller, used for cost attribution and
  /// performance grouping.
  #[ derive( Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize ) ]
  pub enum AgentKind
  {
    /// Plans work before it is carried out.
    Planner,
    /// Produces the artifact (code, text, ...).
    Implementer,
    /// Reviews or critiques another agent's output.
    Reviewer,
    /// Any caller not covered by the above.
    Other( String ),
  }

  /// Task priority, driving the Selector's weight adjustment (spec §4.6 step 6).
  #[ derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize ) ]
  pub enum TaskPriority
  {
    /// Must not fail, performance weighted heavily over cost.
    Critical,
    /// Same weighting as `Critical`.
    High,
    /// Default weighting.
    Medium,
    /// Same weighting as `Medium`.
    Low,
    /// Cost weighted heavily over performance.
    Background,
  }

  impl Default for TaskPriority
  {
    #[ inline ]
    fn default() -> Self
    {
      TaskPriority::Medium
    }
  }

  /// A unit of work submitted by an agent.
  #[ derive( Debug, Clone, Serialize, Deserialize ) ]
  pub struct Task
  {
    /// Unique identifier, used to correlate records and failover events.
    pub id : String,
    /// Free-form task type string. Its content, not a separate enum, drives
    /// the capability-inference heuristic in spec §4.6 step 3.
    pub task_type : String,
    /// Scheduling priority.
    pub priority : TaskPriority,
    /// Opaque prompt text, never inspected beyond pass-through.
    pub prompt : String,
    /// Opaque generation parameters, passed through to the adapter untouched.
    pub parameters : serde_json::Value,
    /// Upper bound on tokens the adapter should generate.
    pub max_tokens : Option< u32 >,
    /// Sampling temperature, passed through untouched.
    pub temperature : Option< f32 >,
  }

  impl Task
  {
    /// Infer required capabilities from `task_type`, per spec §4.6 step 3.
    ///
    /// Lexical and order-sensitive on purpose : "code" is checked before
    /// "analysis" so a type string mentioning both routes as code-generation.
    #[ inline ]
    #[ must_use ]
    pub fn inferred_capability( &self ) -> &'static str
    {
      let lower = self.task_type.to_lowercase();
      if lower.contains( "code" ) || lower.contains( "implement" )
      {
        "code-generation"
      }
      else if lower.contains( "analysis" ) || lower.contains( "review" )
      {
        "analysis"
      }
      else
      {
        "text-generation"
      }
    }
  }

  /// Optional constraints narrowing a single selection call.
  #[ derive( Debug, Clone, Default, Serialize, Deserialize ) ]
  pub struct SelectionConstraints
  {
    /// Providers to drop before scoring.
    pub excluded_providers : Vec< String >,
    /// Capabilities the model must additionally have, beyond inference.
    pub required_capabilities : Vec< String >,
    /// Drop models whose declared typical latency exceeds this.
    pub max_latency_ms : Option< u64 >,
  }
}

pub use private::{ AgentKind, Task, TaskPriority, SelectionConstraints };

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn task_with_type( task_type : &str ) -> Task
  {
    Task
    {
      id : "task-1".to_string(),
      task_type : task_type.to_string(),
      priority : TaskPriority::default(),
      prompt : String::new(),
      parameters : serde_json::Value::Null,
      max_tokens : None,
      temperature : None,
    }
  }

  #[ test ]
  fn code_keyword_wins_over_analysis_keyword()
  {
    let task = task_with_type( "code-review" );
    assert_eq!( task.inferred_capability(), "code-generation" );
  }

  #[ test ]
  fn implement_keyword_infers_code_generation()
  {
    let task = task_with_type( "implement-feature" );
    assert_eq!( task.inferred_capability(), "code-generation" );
  }

  #[ test ]
  fn review_keyword_infers_analysis_without_code_keyword()
  {
    let task = task_with_type( "peer-review" );
    assert_eq!( task.inferred_capability(), "analysis" );
  }

  #[ test ]
  fn unrecognized_type_defaults_to_text_generation()
  {
    let task = task_with_type( "summarize" );
    assert_eq!( task.inferred_capability(), "text-generation" );
  }

  #[ test ]
  fn inference_is_case_insensitive()
  {
    let task = task_with_type( "CODE-GENERATION" );
    assert_eq!( task.inferred_capability(), "code-generation" );
  }

  #[ test ]
  fn default_priority_is_medium()
  {
    assert_eq!( TaskPriority::default(), TaskPriority::Medium );
  }

  #[ test ]
  fn priority_ordering_matches_urgency()
  {
    assert!( TaskPriority::Critical < TaskPriority::Medium );
    assert!( TaskPriority::Medium < TaskPriority::Background );
  }
}
