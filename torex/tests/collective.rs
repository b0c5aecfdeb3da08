mod collective {
    pub mod helpers;

    mod alltoall;
    mod folded;
    mod mate;
    mod relay;
}
