/// Decide-then-evolve an aggregate in place (no IO).
///
/// Calls `handle` and applies each returned event. Persistence and publication
/// are the dispatcher's job; this is the pure core of that pipeline.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: storefront_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
